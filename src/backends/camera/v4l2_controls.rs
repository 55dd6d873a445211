// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 runtime controls for an open camera
//!
//! PipeWire streams the frames, but zoom, exposure bias and focus are
//! still V4L2 controls on the node behind it. Values reach the driver
//! through `VIDIOC_S_CTRL`; [`ControlDevice`] keeps the ioctls behind a
//! seam so the mapping logic runs without hardware.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use tracing::{debug, warn};

// ===== Control class bases =====
const V4L2_CTRL_CLASS_CAMERA: u32 = 0x009a0000;
const V4L2_CID_CAMERA_CLASS_BASE: u32 = V4L2_CTRL_CLASS_CAMERA | 0x900;

/// Continuous autofocus on/off
pub const V4L2_CID_FOCUS_AUTO: u32 = V4L2_CID_CAMERA_CLASS_BASE + 12;
/// Optical/digital zoom position, driver units
pub const V4L2_CID_ZOOM_ABSOLUTE: u32 = V4L2_CID_CAMERA_CLASS_BASE + 13;
/// Exposure bias in 0.001 EV
pub const V4L2_CID_AUTO_EXPOSURE_BIAS: u32 = V4L2_CID_CAMERA_CLASS_BASE + 19;
/// One-shot autofocus (button control)
pub const V4L2_CID_AUTO_FOCUS_START: u32 = V4L2_CID_CAMERA_CLASS_BASE + 28;

// ===== Control types =====
const V4L2_CTRL_TYPE_INTEGER: u32 = 1;
const V4L2_CTRL_TYPE_BOOLEAN: u32 = 2;
const V4L2_CTRL_TYPE_MENU: u32 = 3;
const V4L2_CTRL_TYPE_BUTTON: u32 = 4;
const V4L2_CTRL_TYPE_INTEGER_MENU: u32 = 9;

// ===== Control flags =====
const V4L2_CTRL_FLAG_DISABLED: u32 = 0x0001;
const V4L2_CTRL_FLAG_INACTIVE: u32 = 0x0010;

// (dir << 30) | (size << 16) | ('V' << 8) | nr, dir 3 = READ|WRITE
const VIDIOC_S_CTRL: libc::c_ulong = 0xC008561C;
const VIDIOC_QUERYCTRL: libc::c_ulong = 0xC0445624;
const VIDIOC_QUERYMENU: libc::c_ulong = 0xC02C5625;

#[repr(C)]
struct V4l2Control {
    id: u32,
    value: i32,
}

#[repr(C)]
struct V4l2Queryctrl {
    id: u32,
    ctrl_type: u32,
    name: [u8; 32],
    minimum: i32,
    maximum: i32,
    step: i32,
    default_value: i32,
    flags: u32,
    reserved: [u32; 2],
}

/// `name` is a union with the `__s64 value` of integer menus
#[repr(C)]
#[repr(packed)]
struct V4l2Querymenu {
    id: u32,
    index: u32,
    name: [u8; 32],
    reserved: u32,
}

/// V4L2 control type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    Integer,
    Boolean,
    Menu,
    Button,
    IntegerMenu,
    Unknown(u32),
}

impl From<u32> for ControlType {
    fn from(value: u32) -> Self {
        match value {
            V4L2_CTRL_TYPE_INTEGER => ControlType::Integer,
            V4L2_CTRL_TYPE_BOOLEAN => ControlType::Boolean,
            V4L2_CTRL_TYPE_MENU => ControlType::Menu,
            V4L2_CTRL_TYPE_BUTTON => ControlType::Button,
            V4L2_CTRL_TYPE_INTEGER_MENU => ControlType::IntegerMenu,
            other => ControlType::Unknown(other),
        }
    }
}

/// Range and state of one control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    pub id: u32,
    pub ctrl_type: ControlType,
    pub minimum: i32,
    pub maximum: i32,
    pub step: i32,
    pub default_value: i32,
    pub flags: u32,
}

impl ControlInfo {
    pub fn is_disabled(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_DISABLED != 0
    }

    /// Present but currently not changeable, e.g. bias with manual exposure
    pub fn is_inactive(&self) -> bool {
        self.flags & V4L2_CTRL_FLAG_INACTIVE != 0
    }

    /// Clamp into range and snap to the control's step
    pub fn snap(&self, value: i64) -> i32 {
        let min = self.minimum as i64;
        let max = self.maximum as i64;
        let clamped = value.clamp(min, max.max(min));
        let step = (self.step as i64).max(1);
        let snapped = min + ((clamped - min) + step / 2) / step * step;
        snapped.min(max.max(min)) as i32
    }
}

/// Entry of an integer menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuValue {
    pub index: u32,
    pub value: i64,
}

/// Index of the menu entry closest to `target`
pub fn nearest_menu_index(values: &[MenuValue], target: i64) -> Option<u32> {
    values
        .iter()
        .min_by_key(|entry| (entry.value - target).abs())
        .map(|entry| entry.index)
}

/// Driver value for a zoom ratio
///
/// UVC zoom ranges usually start at the 1x value (e.g. 100 for 1.00x), so
/// the ratio scales the minimum. Ranges starting at zero are taken as
/// hundredths of magnification above 1x.
pub fn zoom_value(ratio: f32, info: &ControlInfo) -> i32 {
    let ratio = ratio.max(1.0) as f64;
    let raw = if info.minimum > 0 {
        (info.minimum as f64 * ratio).round()
    } else {
        (info.minimum as f64 + (ratio - 1.0) * 100.0).round()
    };
    info.snap(raw as i64)
}

/// Access to the controls of one device
pub trait ControlDevice: Send {
    /// Control info, `None` when the device does not have it
    fn query(&self, id: u32) -> Option<ControlInfo>;

    /// Values of an integer menu control
    fn menu_values(&self, id: u32, info: &ControlInfo) -> Vec<MenuValue>;

    fn set(&self, id: u32, value: i32) -> Result<(), String>;

    /// Whether the control exists and can be written right now
    fn writable(&self, id: u32) -> Option<ControlInfo> {
        self.query(id).filter(|info| !info.is_disabled() && !info.is_inactive())
    }
}

/// A `/dev/video*` node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V4l2Node {
    path: String,
}

impl V4l2Node {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ControlDevice for V4l2Node {
    fn query(&self, id: u32) -> Option<ControlInfo> {
        let file = File::open(&self.path).ok()?;
        let fd = file.as_raw_fd();

        let mut qctrl = V4l2Queryctrl {
            id,
            ctrl_type: 0,
            name: [0; 32],
            minimum: 0,
            maximum: 0,
            step: 0,
            default_value: 0,
            flags: 0,
            reserved: [0; 2],
        };

        let result = unsafe { libc::ioctl(fd, VIDIOC_QUERYCTRL, &mut qctrl as *mut V4l2Queryctrl) };
        if result < 0 {
            return None;
        }

        Some(ControlInfo {
            id: qctrl.id,
            ctrl_type: qctrl.ctrl_type.into(),
            minimum: qctrl.minimum,
            maximum: qctrl.maximum,
            step: qctrl.step,
            default_value: qctrl.default_value,
            flags: qctrl.flags,
        })
    }

    fn menu_values(&self, id: u32, info: &ControlInfo) -> Vec<MenuValue> {
        let Ok(file) = File::open(&self.path) else {
            return Vec::new();
        };
        let fd = file.as_raw_fd();

        (info.minimum.max(0)..=info.maximum.max(0))
            .filter_map(|index| {
                let mut qmenu = V4l2Querymenu {
                    id,
                    index: index as u32,
                    name: [0; 32],
                    reserved: 0,
                };
                let result =
                    unsafe { libc::ioctl(fd, VIDIOC_QUERYMENU, &mut qmenu as *mut V4l2Querymenu) };
                if result < 0 {
                    // Menus may have holes
                    return None;
                }
                let union = qmenu.name;
                let mut value = [0u8; 8];
                value.copy_from_slice(&union[..8]);
                Some(MenuValue {
                    index: index as u32,
                    value: i64::from_ne_bytes(value),
                })
            })
            .collect()
    }

    fn set(&self, id: u32, value: i32) -> Result<(), String> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| format!("Failed to open {}: {}", self.path, e))?;
        let fd = file.as_raw_fd();

        let mut ctrl = V4l2Control { id, value };
        let result = unsafe { libc::ioctl(fd, VIDIOC_S_CTRL, &mut ctrl as *mut V4l2Control) };
        if result < 0 {
            let errno = std::io::Error::last_os_error();
            warn!(
                path = %self.path,
                control_id = id,
                value,
                ?errno,
                "Failed to set V4L2 control"
            );
            return Err(format!("Failed to set control {:#x}: {}", id, errno));
        }

        if ctrl.value != value {
            debug!(
                path = %self.path,
                control_id = id,
                requested = value,
                actual = ctrl.value,
                "V4L2 control value was clamped"
            );
        }
        Ok(())
    }
}
