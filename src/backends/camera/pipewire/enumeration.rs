// SPDX-License-Identifier: GPL-3.0-only

//! PipeWire camera enumeration
//!
//! Cameras are discovered by parsing `pw-cli ls Node`; the sensor rotation
//! comes from `pw-cli info <id>` since the listing does not carry it.

use super::super::types::{CameraDevice, SensorRotation};
use crate::pipelines::dual::layout::CameraFacing;
use tracing::{debug, info, warn};

/// A `Video/Source` node as listed by `pw-cli ls Node`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoNode {
    pub id: String,
    pub serial: Option<String>,
    pub name: String,
    /// Device node from `object.path`, when the node is V4L2 backed
    pub v4l2_path: Option<String>,
}

impl VideoNode {
    /// Identifier used as the device id, preferring the object serial
    pub fn device_id(&self) -> String {
        match &self.serial {
            Some(serial) => format!("pipewire-serial-{}", serial),
            None => format!("pipewire-{}", self.id),
        }
    }
}

/// Enumerate cameras using PipeWire
pub fn enumerate_pipewire_cameras() -> Vec<CameraDevice> {
    if !is_pipewire_available() {
        warn!("pipewiresrc not available, no cameras");
        return Vec::new();
    }

    let output = match std::process::Command::new("pw-cli")
        .args(["ls", "Node"])
        .output()
    {
        Ok(output) if output.status.success() => output,
        Ok(_) | Err(_) => {
            debug!("pw-cli command failed");
            return Vec::new();
        }
    };

    let nodes = parse_pw_cli_nodes(&String::from_utf8_lossy(&output.stdout));
    let facings = assign_facing(&nodes);

    let cameras: Vec<CameraDevice> = nodes
        .into_iter()
        .zip(facings)
        .map(|(node, facing)| {
            let rotation = query_node_rotation(&node.id);
            debug!(
                id = %node.id,
                serial = ?node.serial,
                name = %node.name,
                v4l2_path = ?node.v4l2_path,
                ?facing,
                %rotation,
                "Found video camera"
            );
            CameraDevice {
                id: node.device_id(),
                name: node.name,
                facing,
                rotation,
                v4l2_path: node.v4l2_path,
            }
        })
        .collect();

    info!(count = cameras.len(), "PipeWire cameras enumerated");
    cameras
}

/// Collect every `Video/Source` node from `pw-cli ls Node` output
pub fn parse_pw_cli_nodes(stdout: &str) -> Vec<VideoNode> {
    #[derive(Default)]
    struct Pending {
        id: Option<String>,
        serial: Option<String>,
        name: Option<String>,
        v4l2_path: Option<String>,
        is_video_source: bool,
    }

    fn flush(pending: Pending, nodes: &mut Vec<VideoNode>) {
        if let (true, Some(id), Some(name)) = (pending.is_video_source, pending.id, pending.name) {
            nodes.push(VideoNode {
                id,
                serial: pending.serial,
                name,
                v4l2_path: pending.v4l2_path,
            });
        }
    }

    let mut nodes = Vec::new();
    let mut current = Pending::default();

    for line in stdout.lines() {
        let trimmed = line.trim();

        // "id 76, type PipeWire:Interface:Node/3"
        if trimmed.starts_with("id ") && trimmed.contains("type PipeWire:Interface:Node") {
            flush(std::mem::take(&mut current), &mut nodes);
            current.id = trimmed
                .strip_prefix("id ")
                .and_then(|rest| rest.split(',').next())
                .map(|id| id.trim().to_string());
            continue;
        }

        if trimmed.contains("media.class") && trimmed.contains("\"Video/Source\"") {
            current.is_video_source = true;
        } else if trimmed.contains("object.serial") {
            current.serial = extract_quoted_value(trimmed);
        } else if trimmed.contains("node.description") {
            current.name = extract_quoted_value(trimmed);
        } else if trimmed.contains("object.path") {
            // "v4l2:/dev/video0"; libcamera nodes have no V4L2 path
            current.v4l2_path = extract_quoted_value(trimmed)
                .and_then(|path| path.strip_prefix("v4l2:").map(str::to_string));
        }
    }
    flush(current, &mut nodes);

    nodes
}

/// Facing hint per node
///
/// "front" or "user" in the name marks a front camera, everything else is
/// back. When nothing is marked front and there are two or more cameras,
/// the second one is taken as front so a back/front pair exists.
pub fn assign_facing(nodes: &[VideoNode]) -> Vec<CameraFacing> {
    let mut facings: Vec<CameraFacing> = nodes
        .iter()
        .map(|node| {
            let name = node.name.to_lowercase();
            if name.contains("front") || name.contains("user") {
                CameraFacing::Front
            } else {
                CameraFacing::Back
            }
        })
        .collect();

    if facings.len() >= 2 && !facings.contains(&CameraFacing::Front) {
        facings[1] = CameraFacing::Front;
    }
    facings
}

/// Extract quoted value from a property line (`key = "value"` -> `value`)
fn extract_quoted_value(line: &str) -> Option<String> {
    let start = line.find('"')?;
    let end = line[start + 1..].find('"')?;
    Some(line[start + 1..start + 1 + end].to_string())
}

/// Query rotation for a PipeWire node using `pw-cli info`
fn query_node_rotation(node_id: &str) -> SensorRotation {
    let output = match std::process::Command::new("pw-cli")
        .args(["info", node_id])
        .output()
    {
        Ok(output) if output.status.success() => output,
        _ => {
            debug!(node_id, "Failed to query node info for rotation");
            return SensorRotation::default();
        }
    };

    parse_rotation(&String::from_utf8_lossy(&output.stdout))
}

fn parse_rotation(info: &str) -> SensorRotation {
    info.lines()
        .map(str::trim)
        .filter(|line| line.contains("api.libcamera.rotation"))
        .find_map(extract_quoted_value)
        .and_then(|value| value.parse::<i32>().ok())
        .map(SensorRotation::from_degrees)
        .unwrap_or_default()
}

/// Target object for `pipewiresrc` from a device id
pub fn target_object(device_id: &str) -> Option<&str> {
    device_id
        .strip_prefix("pipewire-serial-")
        .or_else(|| device_id.strip_prefix("pipewire-"))
        .filter(|s| !s.is_empty())
}

/// Test if PipeWire is available and working
pub fn is_pipewire_available() -> bool {
    if gstreamer::init().is_err() {
        return false;
    }
    gstreamer::ElementFactory::find("pipewiresrc").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
	id 31, type PipeWire:Interface:Node/3
 		object.serial = "31"
 		node.description = "Dummy-Driver"
	id 76, type PipeWire:Interface:Node/3
 		object.path = "v4l2:/dev/video2"
 		object.serial = "2146"
 		node.description = "Integrated Camera (V4L2)"
 		media.class = "Video/Source"
	id 80, type PipeWire:Interface:Node/3
 		object.path = "libcamera:/base/soc/i2c0/ov5640"
 		node.description = "Front User Camera"
 		media.class = "Video/Source"
	id 81, type PipeWire:Interface:Node/3
 		object.serial = "2200"
 		node.description = "Built-in Audio"
 		media.class = "Audio/Source"
"#;

    #[test]
    fn test_parse_video_sources_only() {
        let nodes = parse_pw_cli_nodes(LISTING);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].device_id(), "pipewire-serial-2146");
        assert_eq!(nodes[0].name, "Integrated Camera (V4L2)");
        assert_eq!(nodes[1].device_id(), "pipewire-80");
    }

    #[test]
    fn test_parse_v4l2_path() {
        let nodes = parse_pw_cli_nodes(LISTING);
        assert_eq!(nodes[0].v4l2_path.as_deref(), Some("/dev/video2"));
        assert_eq!(nodes[1].v4l2_path, None);
    }

    #[test]
    fn test_facing_hints() {
        let nodes = parse_pw_cli_nodes(LISTING);
        assert_eq!(
            assign_facing(&nodes),
            vec![CameraFacing::Back, CameraFacing::Front]
        );
    }

    #[test]
    fn test_facing_without_hints_pairs_up() {
        let node = |name: &str| VideoNode {
            id: "1".into(),
            serial: None,
            name: name.into(),
            v4l2_path: None,
        };
        let nodes = vec![node("cam a"), node("cam b"), node("cam c")];
        assert_eq!(
            assign_facing(&nodes),
            vec![CameraFacing::Back, CameraFacing::Front, CameraFacing::Back]
        );
        assert_eq!(assign_facing(&nodes[..1]), vec![CameraFacing::Back]);
    }

    #[test]
    fn test_parse_rotation() {
        let info = "  * api.libcamera.rotation = \"270\"\n";
        assert_eq!(parse_rotation(info), SensorRotation::Rotate270);
        assert_eq!(parse_rotation("nothing"), SensorRotation::None);
    }

    #[test]
    fn test_target_object() {
        assert_eq!(target_object("pipewire-serial-2146"), Some("2146"));
        assert_eq!(target_object("pipewire-80"), Some("80"));
        assert_eq!(target_object("pipewire-"), None);
    }
}
