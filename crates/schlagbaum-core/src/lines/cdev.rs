//! Linux GPIO character device adapter (uAPI v2).
//!
//! One line request for all inputs (both edges, pull-up bias) and one for
//! all outputs. Edge timestamps are the kernel's monotonic clock.

use std::fs::File;
use std::io::Read;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, info, warn};

use super::{EdgeDirection, LineChip, LineError, MAX_LINES, RawEdge};

#[allow(unsafe_code)]
mod uapi {
    //! Mirrors of the `linux/gpio.h` v2 structures and ioctls.

    use super::MAX_LINES;

    pub const MAX_NAME_SIZE: usize = 32;
    pub const NUM_ATTRS_MAX: usize = 10;

    pub const FLAG_ACTIVE_LOW: u64 = 1 << 1;
    pub const FLAG_INPUT: u64 = 1 << 2;
    pub const FLAG_OUTPUT: u64 = 1 << 3;
    pub const FLAG_EDGE_RISING: u64 = 1 << 4;
    pub const FLAG_EDGE_FALLING: u64 = 1 << 5;
    pub const FLAG_BIAS_PULL_UP: u64 = 1 << 8;
    pub const FLAG_BIAS_DISABLED: u64 = 1 << 10;

    pub const EVENT_RISING_EDGE: u32 = 1;
    pub const EVENT_FALLING_EDGE: u32 = 2;

    /// `sizeof(struct gpio_v2_line_event)`
    pub const EVENT_SIZE: usize = 48;

    #[repr(C)]
    pub struct ChipInfo {
        pub name: [u8; MAX_NAME_SIZE],
        pub label: [u8; MAX_NAME_SIZE],
        pub lines: u32,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct LineAttribute {
        pub id: u32,
        pub padding: u32,
        pub value: u64,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct LineConfigAttribute {
        pub attr: LineAttribute,
        pub mask: u64,
    }

    #[repr(C)]
    pub struct LineConfig {
        pub flags: u64,
        pub num_attrs: u32,
        pub padding: [u32; 5],
        pub attrs: [LineConfigAttribute; NUM_ATTRS_MAX],
    }

    #[repr(C)]
    pub struct LineRequest {
        pub offsets: [u32; MAX_LINES],
        pub consumer: [u8; MAX_NAME_SIZE],
        pub config: LineConfig,
        pub num_lines: u32,
        pub event_buffer_size: u32,
        pub padding: [u32; 5],
        pub fd: i32,
    }

    #[repr(C)]
    pub struct LineValues {
        pub bits: u64,
        pub mask: u64,
    }

    const _: () = assert!(std::mem::size_of::<ChipInfo>() == 68);
    const _: () = assert!(std::mem::size_of::<LineConfig>() == 272);
    const _: () = assert!(std::mem::size_of::<LineRequest>() == 592);
    const _: () = assert!(std::mem::size_of::<LineValues>() == 16);

    impl LineRequest {
        /// Caller guarantees `offsets.len() <= MAX_LINES`.
        #[allow(clippy::cast_possible_truncation)]
        pub fn new(offsets: &[u32], consumer: &str, flags: u64) -> Self {
            let empty_attr = LineConfigAttribute {
                attr: LineAttribute {
                    id: 0,
                    padding: 0,
                    value: 0,
                },
                mask: 0,
            };
            let mut req = Self {
                offsets: [0; MAX_LINES],
                consumer: [0; MAX_NAME_SIZE],
                config: LineConfig {
                    flags,
                    num_attrs: 0,
                    padding: [0; 5],
                    attrs: [empty_attr; NUM_ATTRS_MAX],
                },
                num_lines: 0,
                event_buffer_size: 0,
                padding: [0; 5],
                fd: -1,
            };
            req.offsets[..offsets.len()].copy_from_slice(offsets);
            req.num_lines = offsets.len() as u32;
            let name = consumer.as_bytes();
            let n = name.len().min(MAX_NAME_SIZE - 1);
            req.consumer[..n].copy_from_slice(&name[..n]);
            req
        }
    }

    nix::ioctl_read!(get_chipinfo, 0xB4, 0x01, ChipInfo);
    nix::ioctl_readwrite!(get_line, 0xB4, 0x07, LineRequest);
    nix::ioctl_readwrite!(set_values, 0xB4, 0x0F, LineValues);
}

/// GPIO chip opened through `/dev/gpiochipN`.
#[derive(Debug)]
pub struct CdevChip {
    _chip: File,
    inputs: Option<File>,
    outputs: Option<OwnedFd>,
}

impl CdevChip {
    /// Open `device` and request the given input and output lines.
    ///
    /// `active_low` inverts the physical level of every output.
    pub fn open(
        device: &Path,
        inputs: &[u32],
        outputs: &[u32],
        active_low: bool,
    ) -> Result<Self, LineError> {
        if inputs.len() > MAX_LINES {
            return Err(LineError::TooManyLines(inputs.len()));
        }
        if outputs.len() > MAX_LINES {
            return Err(LineError::TooManyLines(outputs.len()));
        }

        let chip = File::open(device).map_err(|source| LineError::Open {
            device: device.display().to_string(),
            source,
        })?;

        let mut info = uapi::ChipInfo {
            name: [0; uapi::MAX_NAME_SIZE],
            label: [0; uapi::MAX_NAME_SIZE],
            lines: 0,
        };
        #[allow(unsafe_code)]
        // SAFETY: `info` is a writable `gpiochip_info` and the descriptor is open.
        let res = unsafe { uapi::get_chipinfo(chip.as_raw_fd(), &raw mut info) };
        res.map_err(|source| LineError::Sys {
            op: "GPIO_GET_CHIPINFO",
            source,
        })?;
        info!(
            device = %device.display(),
            name = %c_string(&info.name),
            label = %c_string(&info.label),
            lines = info.lines,
            "GPIO chip opened"
        );

        let inputs_fd = if inputs.is_empty() {
            None
        } else {
            let flags = uapi::FLAG_INPUT
                | uapi::FLAG_BIAS_PULL_UP
                | uapi::FLAG_EDGE_RISING
                | uapi::FLAG_EDGE_FALLING;
            Some(File::from(request_lines(&chip, inputs, "schlagbaum-in", flags)?))
        };

        let outputs_fd = if outputs.is_empty() {
            None
        } else {
            let mut flags = uapi::FLAG_OUTPUT | uapi::FLAG_BIAS_DISABLED;
            if active_low {
                flags |= uapi::FLAG_ACTIVE_LOW;
            }
            Some(request_lines(&chip, outputs, "schlagbaum-out", flags)?)
        };
        debug!(inputs = ?inputs, outputs = ?outputs, active_low, "GPIO lines requested");

        Ok(Self {
            _chip: chip,
            inputs: inputs_fd,
            outputs: outputs_fd,
        })
    }
}

fn request_lines(
    chip: &File,
    offsets: &[u32],
    consumer: &str,
    flags: u64,
) -> Result<OwnedFd, LineError> {
    let mut req = uapi::LineRequest::new(offsets, consumer, flags);
    #[allow(unsafe_code)]
    // SAFETY: `req` is a fully initialised `gpio_v2_line_request`.
    let res = unsafe { uapi::get_line(chip.as_raw_fd(), &raw mut req) };
    res.map_err(|source| LineError::Sys {
        op: "GPIO_V2_GET_LINE",
        source,
    })?;
    #[allow(unsafe_code)]
    // SAFETY: on success the kernel hands us a new descriptor that nothing else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(req.fd) };
    Ok(fd)
}

fn c_string(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn read_u32(raw: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&raw[at..at + 4]);
    u32::from_ne_bytes(b)
}

impl LineChip for CdevChip {
    fn poll_edge(&mut self, timeout: Duration) -> Result<Option<RawEdge>, LineError> {
        let Some(inputs) = self.inputs.as_mut() else {
            return Ok(None);
        };

        let wait = PollTimeout::from(u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX));
        let ready = {
            let mut fds = [PollFd::new(
                inputs.as_fd(),
                PollFlags::POLLIN | PollFlags::POLLPRI,
            )];
            match poll(&mut fds, wait) {
                Ok(n) => n,
                Err(Errno::EINTR) => return Ok(None),
                Err(source) => return Err(LineError::Sys { op: "poll", source }),
            }
        };
        if ready == 0 {
            return Ok(None);
        }

        let mut raw = [0u8; uapi::EVENT_SIZE];
        inputs.read_exact(&mut raw)?;

        let mut ts = [0u8; 8];
        ts.copy_from_slice(&raw[0..8]);
        let timestamp = Duration::from_nanos(u64::from_ne_bytes(ts));
        let id = read_u32(&raw, 8);
        let line = read_u32(&raw, 12);

        let direction = match id {
            uapi::EVENT_RISING_EDGE => EdgeDirection::Rising,
            uapi::EVENT_FALLING_EDGE => EdgeDirection::Falling,
            other => {
                warn!(line, id = other, "Unknown GPIO event id");
                return Ok(None);
            }
        };
        Ok(Some(RawEdge {
            line,
            direction,
            timestamp,
        }))
    }

    fn set_levels(&mut self, mask: u64, bits: u64) -> Result<(), LineError> {
        let Some(outputs) = self.outputs.as_ref() else {
            return Ok(());
        };
        let mut values = uapi::LineValues { bits, mask };
        #[allow(unsafe_code)]
        // SAFETY: `values` is a valid `gpio_v2_line_values` for an output request fd.
        let res = unsafe { uapi::set_values(outputs.as_raw_fd(), &raw mut values) };
        res.map_err(|source| LineError::Sys {
            op: "GPIO_V2_LINE_SET_VALUES",
            source,
        })?;
        Ok(())
    }
}
