// SPDX-License-Identifier: MPL-2.0

//! Runtime controls of a PipeWire camera
//!
//! `pipewiresrc` has no per-request parameters, so request changes are
//! written straight to the V4L2 node behind the PipeWire device and the
//! torch goes through the LED class in sysfs.

use super::super::torch::TorchLed;
use super::super::types::{AfMode, CameraDevice, CaptureRequest};
use super::super::v4l2_controls::{
    ControlDevice, ControlInfo, ControlType, V4L2_CID_AUTO_EXPOSURE_BIAS,
    V4L2_CID_AUTO_FOCUS_START, V4L2_CID_FOCUS_AUTO, V4L2_CID_ZOOM_ABSOLUTE, V4l2Node,
    nearest_menu_index, zoom_value,
};
use crate::errors::SessionError;
use tracing::{debug, info};

/// Control backends of one open device
pub struct DeviceControls {
    id: String,
    node: Option<Box<dyn ControlDevice>>,
    torches: Vec<TorchLed>,
}

impl DeviceControls {
    pub fn new(
        id: impl Into<String>,
        node: Option<Box<dyn ControlDevice>>,
        torches: Vec<TorchLed>,
    ) -> Self {
        Self {
            id: id.into(),
            node,
            torches,
        }
    }

    /// Controls for `device`: its V4L2 node if it has one, and the torch
    /// LEDs of the machine
    pub fn for_device(device: &CameraDevice) -> Self {
        let node = device
            .v4l2_path
            .as_ref()
            .map(|path| Box::new(V4l2Node::new(path.clone())) as Box<dyn ControlDevice>);
        let torches = TorchLed::discover();
        info!(
            id = %device.id,
            v4l2_path = ?device.v4l2_path,
            torches = torches.len(),
            "Camera controls resolved"
        );
        Self::new(device.id.clone(), node, torches)
    }

    /// Write every field that differs between `current` and `next`
    ///
    /// Returns `Ok(false)` if at least one changed field has no control on
    /// this device. The remaining fields are still applied.
    pub fn apply(
        &self,
        current: &CaptureRequest,
        next: &CaptureRequest,
    ) -> Result<bool, SessionError> {
        let mut supported = true;

        if next.torch != current.torch {
            supported &= self.set_torch(next.torch)?;
        }
        if next.zoom_ratio != current.zoom_ratio {
            supported &= self.set_zoom(next.zoom_ratio)?;
        }
        if next.exposure_compensation != current.exposure_compensation {
            supported &= self.set_exposure_bias(next.exposure_compensation)?;
        }
        if next.af_mode != current.af_mode {
            supported &= self.set_af_mode(next.af_mode)?;
        }
        if next.af_trigger {
            supported &= self.set_simple(V4L2_CID_AUTO_FOCUS_START, 1, "af_trigger")?;
        }

        Ok(supported)
    }

    fn set_torch(&self, on: bool) -> Result<bool, SessionError> {
        if self.torches.is_empty() {
            debug!(id = %self.id, on, "No torch LED");
            return Ok(false);
        }
        for led in &self.torches {
            led.set(on).map_err(|e| self.failed(format!("torch {}: {}", led.name(), e)))?;
        }
        debug!(id = %self.id, on, "Torch set");
        Ok(true)
    }

    fn set_zoom(&self, ratio: f32) -> Result<bool, SessionError> {
        let Some((node, info)) = self.writable(V4L2_CID_ZOOM_ABSOLUTE) else {
            debug!(id = %self.id, ratio, "Zoom not supported");
            return Ok(false);
        };
        let value = zoom_value(ratio, &info);
        node.set(V4L2_CID_ZOOM_ABSOLUTE, value).map_err(|e| self.failed(e))?;
        debug!(id = %self.id, ratio, value, "Zoom set");
        Ok(true)
    }

    fn set_exposure_bias(&self, millis_ev: i32) -> Result<bool, SessionError> {
        let Some((node, info)) = self.writable(V4L2_CID_AUTO_EXPOSURE_BIAS) else {
            debug!(id = %self.id, millis_ev, "Exposure bias not supported");
            return Ok(false);
        };
        let value = match info.ctrl_type {
            ControlType::Integer => info.snap(millis_ev as i64),
            ControlType::IntegerMenu => {
                let values = node.menu_values(V4L2_CID_AUTO_EXPOSURE_BIAS, &info);
                match nearest_menu_index(&values, millis_ev as i64) {
                    Some(index) => index as i32,
                    None => return Ok(false),
                }
            }
            other => {
                debug!(id = %self.id, ?other, "Unexpected exposure bias control type");
                return Ok(false);
            }
        };
        node.set(V4L2_CID_AUTO_EXPOSURE_BIAS, value).map_err(|e| self.failed(e))?;
        debug!(id = %self.id, millis_ev, value, "Exposure bias set");
        Ok(true)
    }

    fn set_af_mode(&self, mode: AfMode) -> Result<bool, SessionError> {
        let continuous = matches!(mode, AfMode::ContinuousVideo | AfMode::ContinuousPicture);
        self.set_simple(V4L2_CID_FOCUS_AUTO, continuous as i32, "af_mode")
    }

    fn set_simple(&self, id: u32, value: i32, name: &str) -> Result<bool, SessionError> {
        let Some((node, _)) = self.writable(id) else {
            debug!(id = %self.id, control = name, "Control not supported");
            return Ok(false);
        };
        node.set(id, value).map_err(|e| self.failed(e))?;
        debug!(id = %self.id, control = name, value, "Control set");
        Ok(true)
    }

    fn writable(&self, id: u32) -> Option<(&dyn ControlDevice, ControlInfo)> {
        let node = self.node.as_deref()?;
        node.writable(id).map(|info| (node, info))
    }

    fn failed(&self, reason: String) -> SessionError {
        SessionError::Control {
            id: self.id.clone(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::v4l2_controls::MenuValue;
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeNode {
        controls: HashMap<u32, ControlInfo>,
        menu: Vec<MenuValue>,
        writes: Arc<Mutex<Vec<(u32, i32)>>>,
        fail: bool,
    }

    impl FakeNode {
        fn with(mut self, id: u32, ctrl_type: ControlType, minimum: i32, maximum: i32) -> Self {
            self.controls.insert(
                id,
                ControlInfo {
                    id,
                    ctrl_type,
                    minimum,
                    maximum,
                    step: 1,
                    default_value: minimum,
                    flags: 0,
                },
            );
            self
        }
    }

    impl ControlDevice for FakeNode {
        fn query(&self, id: u32) -> Option<ControlInfo> {
            self.controls.get(&id).cloned()
        }

        fn menu_values(&self, _id: u32, _info: &ControlInfo) -> Vec<MenuValue> {
            self.menu.clone()
        }

        fn set(&self, id: u32, value: i32) -> Result<(), String> {
            if self.fail {
                return Err("EBUSY".into());
            }
            self.writes.lock().push((id, value));
            Ok(())
        }
    }

    fn controls(node: FakeNode) -> (DeviceControls, Arc<Mutex<Vec<(u32, i32)>>>) {
        let writes = Arc::clone(&node.writes);
        (DeviceControls::new("cam0", Some(Box::new(node)), Vec::new()), writes)
    }

    #[test]
    fn test_zoom_and_bias_written() {
        let node = FakeNode::default()
            .with(V4L2_CID_ZOOM_ABSOLUTE, ControlType::Integer, 100, 400)
            .with(V4L2_CID_AUTO_EXPOSURE_BIAS, ControlType::Integer, -2000, 2000);
        let (controls, writes) = controls(node);

        let current = CaptureRequest::record();
        let next = CaptureRequest {
            zoom_ratio: 2.0,
            exposure_compensation: 2500,
            ..current.clone()
        };
        assert!(controls.apply(&current, &next).unwrap());
        assert_eq!(
            *writes.lock(),
            vec![(V4L2_CID_ZOOM_ABSOLUTE, 200), (V4L2_CID_AUTO_EXPOSURE_BIAS, 2000)]
        );
    }

    #[test]
    fn test_unchanged_fields_not_written() {
        let node =
            FakeNode::default().with(V4L2_CID_ZOOM_ABSOLUTE, ControlType::Integer, 100, 400);
        let (controls, writes) = controls(node);

        let request = CaptureRequest::record();
        assert!(controls.apply(&request, &request).unwrap());
        assert!(writes.lock().is_empty());
    }

    #[test]
    fn test_integer_menu_bias_uses_nearest_entry() {
        let mut node =
            FakeNode::default().with(V4L2_CID_AUTO_EXPOSURE_BIAS, ControlType::IntegerMenu, 0, 2);
        node.menu = vec![
            MenuValue { index: 0, value: -1000 },
            MenuValue { index: 1, value: 0 },
            MenuValue { index: 2, value: 1000 },
        ];
        let (controls, writes) = controls(node);

        let current = CaptureRequest::record();
        let next = CaptureRequest {
            exposure_compensation: 700,
            ..current.clone()
        };
        assert!(controls.apply(&current, &next).unwrap());
        assert_eq!(*writes.lock(), vec![(V4L2_CID_AUTO_EXPOSURE_BIAS, 2)]);
    }

    #[test]
    fn test_af_mode_and_trigger() {
        let node = FakeNode::default()
            .with(V4L2_CID_FOCUS_AUTO, ControlType::Boolean, 0, 1)
            .with(V4L2_CID_AUTO_FOCUS_START, ControlType::Button, 0, 0);
        let (controls, writes) = controls(node);

        let current = CaptureRequest::record();
        let next = CaptureRequest {
            af_mode: AfMode::Auto,
            af_trigger: true,
            ..current.clone()
        };
        assert!(controls.apply(&current, &next).unwrap());
        assert_eq!(
            *writes.lock(),
            vec![(V4L2_CID_FOCUS_AUTO, 0), (V4L2_CID_AUTO_FOCUS_START, 1)]
        );
    }

    #[test]
    fn test_missing_controls_reported() {
        let node =
            FakeNode::default().with(V4L2_CID_ZOOM_ABSOLUTE, ControlType::Integer, 100, 400);
        let (controls, writes) = controls(node);

        let current = CaptureRequest::record();
        let next = CaptureRequest {
            torch: true,
            zoom_ratio: 3.0,
            exposure_compensation: 1000,
            ..current.clone()
        };
        // Zoom still goes through
        assert!(!controls.apply(&current, &next).unwrap());
        assert_eq!(*writes.lock(), vec![(V4L2_CID_ZOOM_ABSOLUTE, 300)]);
    }

    #[test]
    fn test_no_node_supports_nothing() {
        let controls = DeviceControls::new("cam0", None, Vec::new());
        let current = CaptureRequest::record();
        let next = CaptureRequest {
            zoom_ratio: 2.0,
            ..current.clone()
        };
        assert!(!controls.apply(&current, &next).unwrap());
    }

    #[test]
    fn test_disabled_control_unsupported() {
        let mut node =
            FakeNode::default().with(V4L2_CID_ZOOM_ABSOLUTE, ControlType::Integer, 100, 400);
        if let Some(info) = node.controls.get_mut(&V4L2_CID_ZOOM_ABSOLUTE) {
            info.flags = 0x0001;
        }
        let (controls, writes) = controls(node);

        let current = CaptureRequest::record();
        let next = CaptureRequest {
            zoom_ratio: 2.0,
            ..current.clone()
        };
        assert!(!controls.apply(&current, &next).unwrap());
        assert!(writes.lock().is_empty());
    }

    #[test]
    fn test_failed_write_is_error() {
        let mut node =
            FakeNode::default().with(V4L2_CID_ZOOM_ABSOLUTE, ControlType::Integer, 100, 400);
        node.fail = true;
        let (controls, _) = controls(node);

        let current = CaptureRequest::record();
        let next = CaptureRequest {
            zoom_ratio: 2.0,
            ..current.clone()
        };
        let err = controls.apply(&current, &next).unwrap_err();
        assert!(matches!(err, SessionError::Control { ref id, .. } if id == "cam0"));
    }
}
