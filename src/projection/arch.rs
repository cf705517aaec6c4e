// Longest matching model number wins, so "RX 5700" is RDNA and not the
// Polaris "570". Unknown names fall back to the newest generation.

use crate::profile::Vendor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    pub name: &'static str,
    pub pcie_gen: u8,
    pub process: &'static str,
    pub thermal_limit_c: u32,
}

impl Generation {
    pub fn bus_type(&self) -> String {
        format!("PCI Express x16 Gen{}", self.pcie_gen)
    }
}

pub const KEPLER: Generation = Generation {
    name: "Kepler",
    pcie_gen: 3,
    process: "28nm",
    thermal_limit_c: 90,
};
pub const MAXWELL: Generation = Generation {
    name: "Maxwell",
    pcie_gen: 3,
    process: "28nm",
    thermal_limit_c: 90,
};
pub const PASCAL: Generation = Generation {
    name: "Pascal",
    pcie_gen: 3,
    process: "16nm",
    thermal_limit_c: 90,
};
pub const TURING: Generation = Generation {
    name: "Turing",
    pcie_gen: 3,
    process: "12nm",
    thermal_limit_c: 90,
};
pub const AMPERE: Generation = Generation {
    name: "Ampere",
    pcie_gen: 4,
    process: "8nm",
    thermal_limit_c: 90,
};
pub const ADA_LOVELACE: Generation = Generation {
    name: "Ada Lovelace",
    pcie_gen: 4,
    process: "5nm",
    thermal_limit_c: 83,
};

pub const POLARIS: Generation = Generation {
    name: "Polaris",
    pcie_gen: 3,
    process: "14nm",
    thermal_limit_c: 90,
};
pub const RDNA: Generation = Generation {
    name: "RDNA",
    pcie_gen: 4,
    process: "7nm",
    thermal_limit_c: 90,
};
pub const RDNA2: Generation = Generation {
    name: "RDNA 2",
    pcie_gen: 4,
    process: "7nm",
    thermal_limit_c: 90,
};
pub const RDNA3: Generation = Generation {
    name: "RDNA 3",
    pcie_gen: 4,
    process: "5nm",
    thermal_limit_c: 90,
};

const NVIDIA_MODELS: &[(&str, Generation)] = &[
    ("750", KEPLER),
    ("760", KEPLER),
    ("770", KEPLER),
    ("780", KEPLER),
    ("950", MAXWELL),
    ("960", MAXWELL),
    ("970", MAXWELL),
    ("980", MAXWELL),
    ("1050", PASCAL),
    ("1060", PASCAL),
    ("1070", PASCAL),
    ("1080", PASCAL),
    ("1650", TURING),
    ("1660", TURING),
    ("2060", TURING),
    ("2070", TURING),
    ("2080", TURING),
    ("3050", AMPERE),
    ("3060", AMPERE),
    ("3070", AMPERE),
    ("3080", AMPERE),
    ("3090", AMPERE),
    ("4060", ADA_LOVELACE),
    ("4070", ADA_LOVELACE),
    ("4080", ADA_LOVELACE),
    ("4090", ADA_LOVELACE),
];

const AMD_MODELS: &[(&str, Generation)] = &[
    ("550", POLARIS),
    ("560", POLARIS),
    ("570", POLARIS),
    ("580", POLARIS),
    ("590", POLARIS),
    ("5500", RDNA),
    ("5600", RDNA),
    ("5700", RDNA),
    ("6500", RDNA2),
    ("6600", RDNA2),
    ("6700", RDNA2),
    ("6800", RDNA2),
    ("6900", RDNA2),
    ("6950", RDNA2),
    ("7600", RDNA3),
    ("7700", RDNA3),
    ("7800", RDNA3),
    ("7900", RDNA3),
];

fn lookup(name: &str, table: &[(&str, Generation)], newest: Generation) -> Generation {
    let mut best: Option<(&str, Generation)> = None;
    for &(model, generation) in table {
        if !name.contains(model) {
            continue;
        }
        match best {
            Some((current, _)) if current.len() >= model.len() => {}
            _ => best = Some((model, generation)),
        }
    }
    best.map(|(_, generation)| generation).unwrap_or(newest)
}

pub fn nvidia_generation(name: &str) -> Generation {
    lookup(name, NVIDIA_MODELS, ADA_LOVELACE)
}

pub fn amd_generation(name: &str) -> Generation {
    lookup(name, AMD_MODELS, RDNA3)
}

// Generation for either vendor; `None` when the vendor is unknown.
pub fn generation_for(vendor: Vendor, name: &str) -> Option<Generation> {
    match vendor {
        Vendor::Nvidia => Some(nvidia_generation(name)),
        Vendor::Amd => Some(amd_generation(name)),
        Vendor::Unknown => None,
    }
}
