//! Target device definitions, with family-wide memory geometry.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::REVISION_MASK;

/// Device family, sharing write and erase geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Family {
    pub name: String,
    pub description: String,
    #[serde(deserialize_with = "parse_size")]
    pub write_size: u32,
    #[serde(deserialize_with = "parse_size")]
    pub erase_size: u32,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub name: String,
    /// Device id with the revision bits cleared
    #[serde(deserialize_with = "parse_device_id")]
    pub device_id: u16,
    #[serde(deserialize_with = "parse_size")]
    pub flash_size: u32,
}

/// Identity and memory geometry of a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub family: String,
    /// Full id as reported, revision bits included
    pub device_id: u16,
    pub revision: u8,
    /// Write alignment and granularity
    pub write_size: u32,
    /// Erase alignment and granularity
    pub erase_size: u32,
    pub flash_size: u32,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rev. {}", self.name, self.revision)
    }
}

/// What the bootloader told about itself during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderInfo {
    pub address: u32,
    pub version: u16,
    pub device_id: u16,
}

impl fmt::Display for BootloaderInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bootloader {}.{:02} @ 0x{:06X}, device id {:04X}",
            self.version >> 8,
            self.version & 0xff,
            self.address,
            self.device_id
        )
    }
}

/// Immutable registry of known devices, built once and shared by reference.
pub struct DeviceDb {
    families: Vec<Family>,
}

impl DeviceDb {
    pub fn load() -> Result<Self, serde_yaml::Error> {
        Ok(DeviceDb {
            families: vec![serde_yaml::from_str(include_str!(
                "../devices/PIC18FxxJ60.yaml"
            ))?],
        })
    }

    /// Build a registry from YAML family documents.
    pub fn from_yaml<'a>(docs: impl IntoIterator<Item = &'a str>) -> Result<Self, serde_yaml::Error> {
        let families = docs
            .into_iter()
            .map(|doc| serde_yaml::from_str::<Family>(doc))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DeviceDb { families })
    }

    pub fn families(&self) -> &[Family] {
        &self.families
    }

    pub fn find(&self, device_id: u16) -> Option<DeviceDescriptor> {
        let id = device_id & !REVISION_MASK;
        self.families.iter().find_map(|family| {
            let variant = family.variants.iter().find(|v| v.device_id == id)?;
            log::debug!("Find device family: {}", family.name);
            Some(DeviceDescriptor {
                name: variant.name.clone(),
                family: family.name.clone(),
                device_id,
                revision: (device_id & REVISION_MASK) as u8,
                write_size: family.write_size,
                erase_size: family.erase_size,
                flash_size: variant.flash_size,
            })
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Number {
    Int(u32),
    Text(String),
}

fn parse_number(s: &str) -> Option<u32> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    let (digits, scale) = if let Some(n) = s.strip_suffix("KiB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else {
        (s, 1)
    };
    digits.parse::<u32>().ok()?.checked_mul(scale)
}

fn parse_size<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Number::deserialize(deserializer)? {
        Number::Int(n) => Ok(n),
        Number::Text(s) => parse_number(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("error while parsing {:?}", s))),
    }
}

fn parse_device_id<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let id = parse_size(deserializer)?;
    u16::try_from(id)
        .map_err(|_| serde::de::Error::custom(format!("device id 0x{:x} out of range", id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_loads() {
        let db = DeviceDb::load().unwrap();
        assert_eq!(db.families().len(), 1);
        assert_eq!(db.families()[0].variants.len(), 9);
    }

    #[test]
    fn find_splits_revision() {
        let db = DeviceDb::load().unwrap();
        let dev = db.find(0x18c3).unwrap();
        assert_eq!(dev.name, "PIC18F97J60");
        assert_eq!(dev.revision, 3);
        assert_eq!(dev.device_id, 0x18c3);
        assert_eq!(dev.write_size, 64);
        assert_eq!(dev.erase_size, 1024);
        assert_eq!(dev.flash_size, 128 * 1024);
        assert_eq!(dev.to_string(), "PIC18F97J60 rev. 3");

        assert!(db.find(0x4200).is_none());
    }

    #[test]
    fn custom_family() {
        let yaml = r#"
name: Test
description: test parts
write_size: 0x20
erase_size: 512
variants:
  - name: T1
    device_id: "0x0100"
    flash_size: 16KiB
"#;
        let db = DeviceDb::from_yaml([yaml]).unwrap();
        let dev = db.find(0x0101).unwrap();
        assert_eq!(dev.write_size, 32);
        assert_eq!(dev.erase_size, 512);
        assert_eq!(dev.flash_size, 16 * 1024);
    }

    #[test]
    fn bad_sizes_are_errors() {
        let yaml = "name: X\ndescription: x\nwrite_size: lots\nerase_size: 1\nvariants: []\n";
        assert!(DeviceDb::from_yaml([yaml]).is_err());
    }

    #[test]
    fn bootloader_version_format() {
        let info = BootloaderInfo {
            address: 0x1f000,
            version: 0x0102,
            device_id: 0x18c1,
        };
        assert_eq!(
            info.to_string(),
            "bootloader 1.02 @ 0x01F000, device id 18C1"
        );
    }
}
