//! Removable device discovery through `lsblk` JSON output.

use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use crate::error::{ProvisionError, Result};

const REMOVABLE_TRANSPORTS: [&str; 2] = ["usb", "mmc"];

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tran: Option<String>,
    #[serde(default)]
    size: Option<Value>,
    #[serde(default, deserialize_with = "flag")]
    rm: bool,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

/// `rm` is a bool in current util-linux, "0"/"1" in older releases.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_u64().unwrap_or(0) != 0,
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    })
}

fn dev_path(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/dev/{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovableDevice {
    pub path: String,
    pub model: String,
    pub transport: Option<String>,
    pub size: String,
}

impl fmt::Display for RemovableDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({}", self.path, self.model, self.size)?;
        if let Some(transport) = &self.transport {
            write!(f, ", {}", transport)?;
        }
        write!(f, ")")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub path: String,
    /// Where the host already has it mounted, if anywhere.
    pub mountpoint: Option<PathBuf>,
}

fn parse_output(json: &str) -> Result<LsblkOutput> {
    serde_json::from_str(json).map_err(|e| ProvisionError::Parse {
        path: PathBuf::from("lsblk"),
        reason: e.to_string(),
    })
}

fn run_lsblk(args: &[&str]) -> Result<String> {
    let output = Command::new("lsblk").args(args).output().map_err(|e| ProvisionError::Command {
        program: "lsblk".to_string(),
        detail: e.to_string(),
    })?;
    if !output.status.success() {
        return Err(ProvisionError::Command {
            program: "lsblk".to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Removable whole-disk devices in `lsblk -J -d` output.
pub fn parse_removable(json: &str) -> Result<Vec<RemovableDevice>> {
    let devices = parse_output(json)?
        .blockdevices
        .into_iter()
        .filter(|dev| {
            dev.rm
                || dev
                    .tran
                    .as_deref()
                    .is_some_and(|t| REMOVABLE_TRANSPORTS.contains(&t))
        })
        .map(|dev| RemovableDevice {
            path: dev_path(&dev.name),
            model: dev
                .model
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "unknown model".to_string()),
            transport: dev.tran,
            size: match dev.size {
                Some(Value::String(s)) => s,
                Some(Value::Number(n)) => n.to_string(),
                _ => "?".to_string(),
            },
        })
        .collect();
    Ok(devices)
}

pub fn list_removable() -> Result<Vec<RemovableDevice>> {
    let json = run_lsblk(&["-J", "-d", "-o", "NAME,MODEL,TRAN,SIZE,RM"])?;
    let devices = parse_removable(&json)?;
    debug!(count = devices.len(), "removable devices");
    if devices.is_empty() {
        return Err(ProvisionError::DeviceNotFound);
    }
    Ok(devices)
}

fn collect_parts(devices: Vec<LsblkDevice>, out: &mut Vec<Partition>) {
    for dev in devices {
        if dev.kind.as_deref() == Some("part") {
            out.push(Partition {
                path: dev_path(&dev.name),
                mountpoint: dev.mountpoint.filter(|m| !m.is_empty()).map(PathBuf::from),
            });
        }
        collect_parts(dev.children, out);
    }
}

/// The last partition on `device`, which holds the root filesystem on
/// Armbian-style images.
pub fn parse_root_partition(device: &str, json: &str) -> Result<Partition> {
    let mut parts = Vec::new();
    collect_parts(parse_output(json)?.blockdevices, &mut parts);
    parts.pop().ok_or_else(|| ProvisionError::PartitionNotFound {
        device: device.to_string(),
    })
}

pub fn root_partition(device: &str) -> Result<Partition> {
    let json = run_lsblk(&["-J", "-o", "NAME,TYPE,MOUNTPOINT", device])?;
    parse_root_partition(device, &json)
}
