//! Raspberry Pi model detection and memory-mapped access to the BCM
//! peripheral register blocks.
//!
//! All register blocks the driver may ever need are mapped once, up front,
//! so that the process can drop its privileges afterwards and still keep
//! driving the panel.

use std::ffi::CString;
use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr::NonNull;
use std::sync::Arc;

use bitfield::bitfield;
use cfg_if::cfg_if;
use log::debug;
use log::info;
use log::warn;

use crate::error::Hub75Error;

const BCM2708_PERI_BASE: u64 = 0x2000_0000;
const BCM2709_PERI_BASE: u64 = 0x3F00_0000;
const BCM2711_PERI_BASE: u64 = 0xFE00_0000;

pub(crate) const GPIO_REGISTER_OFFSET: u64 = 0x20_0000;
pub(crate) const COUNTER_1MHZ_REGISTER_OFFSET: u64 = 0x3000;
pub(crate) const GPIO_PWM_BASE_OFFSET: u64 = GPIO_REGISTER_OFFSET + 0xC000;
pub(crate) const GPIO_CLK_BASE_OFFSET: u64 = 0x10_1000;

/// Size of every mapped register block.
pub const REGISTER_BLOCK_SIZE: usize = 4 * 1024;

/// Word index of the free-running counter inside the system timer block.
pub(crate) const TIMER_COUNTER_LOW: usize = 1;

bitfield! {
    /// Board revision code as reported in `/proc/cpuinfo`.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RevisionCode(u32);
    impl Debug;
    pub u8, board_type, _: 11, 4;
    pub new_style, _: 23;
}

/// The broad Pi families that differ in peripheral base and timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PiModel {
    Pi1,
    Pi2,
    Pi3,
    Pi4,
}

impl PiModel {
    pub fn from_revision(revision: RevisionCode) -> Self {
        match revision.board_type() {
            // A, B, A+, B+, alpha, CM1, Zero, Zero W
            0x00 | 0x01 | 0x02 | 0x03 | 0x05 | 0x06 | 0x09 | 0x0c => PiModel::Pi1,
            // Pi 2, Zero 2 W
            0x04 | 0x12 => PiModel::Pi2,
            // Pi 4, Pi 400, CM4
            0x11 | 0x13 | 0x14 => PiModel::Pi4,
            _ => PiModel::Pi3,
        }
    }

    /// Determine the model of the board we are running on.
    ///
    /// Falls back to [`PiModel::Pi3`] when no revision can be found.
    pub fn detect() -> Self {
        let revision = read_revision_from_cpuinfo()
            .or_else(read_revision_from_device_tree)
            .filter(|rev| *rev != 0);
        match revision {
            Some(rev) => {
                let code = RevisionCode(rev);
                let model = Self::from_revision(code);
                debug!("revision {:#x} (new style: {}) -> {:?}", rev, code.new_style(), model);
                model
            }
            None => {
                warn!("unknown revision: could not determine Pi model, assuming Pi 3");
                PiModel::Pi3
            }
        }
    }

    pub fn peripheral_base(self) -> u64 {
        match self {
            PiModel::Pi1 => BCM2708_PERI_BASE,
            PiModel::Pi2 | PiModel::Pi3 => BCM2709_PERI_BASE,
            PiModel::Pi4 => BCM2711_PERI_BASE,
        }
    }

    pub fn cores(self) -> usize {
        match self {
            PiModel::Pi1 => 1,
            _ => 4,
        }
    }
}

fn parse_cpuinfo_revision(cpuinfo: &str) -> Option<u32> {
    cpuinfo
        .lines()
        .find(|line| line.starts_with("Revision"))
        .and_then(|line| line.split_once(':'))
        .and_then(|(_, value)| u32::from_str_radix(value.trim(), 16).ok())
}

fn read_revision_from_cpuinfo() -> Option<u32> {
    fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|info| parse_cpuinfo_revision(&info))
}

fn read_revision_from_device_tree() -> Option<u32> {
    let bytes = fs::read("/proc/device-tree/system/linux,revision").ok()?;
    let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_be_bytes(raw))
}

/// One mapped 4 KiB block of peripheral registers.
pub struct RegisterBlock {
    base: NonNull<u32>,
}

// SAFETY: the block is device memory accessed only through volatile reads and
// writes; the mapping itself lives until drop.
unsafe impl Send for RegisterBlock {}
unsafe impl Sync for RegisterBlock {}

impl RegisterBlock {
    const WORDS: usize = REGISTER_BLOCK_SIZE / 4;

    fn map(device: &str, physical_address: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device)?;

        // SAFETY: mapping a fixed-size shared window of the device; the
        // result is checked against MAP_FAILED before use.
        let ptr = unsafe {
            cfg_if! {
                if #[cfg(all(target_os = "linux", target_env = "gnu"))] {
                    libc::mmap64(
                        std::ptr::null_mut(),
                        REGISTER_BLOCK_SIZE,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_SHARED,
                        file.as_raw_fd(),
                        physical_address as libc::off64_t,
                    )
                } else {
                    libc::mmap(
                        std::ptr::null_mut(),
                        REGISTER_BLOCK_SIZE,
                        libc::PROT_READ | libc::PROT_WRITE,
                        libc::MAP_SHARED,
                        file.as_raw_fd(),
                        physical_address as libc::off_t,
                    )
                }
            }
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let base = NonNull::new(ptr.cast::<u32>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
        Ok(Self { base })
    }

    pub fn read(&self, word: usize) -> u32 {
        assert!(word < Self::WORDS);
        // SAFETY: in bounds of the mapping, checked above.
        unsafe { self.base.as_ptr().add(word).read_volatile() }
    }

    pub fn write(&self, word: usize, value: u32) {
        assert!(word < Self::WORDS);
        // SAFETY: in bounds of the mapping, checked above.
        unsafe { self.base.as_ptr().add(word).write_volatile(value) }
    }
}

impl Drop for RegisterBlock {
    fn drop(&mut self) {
        // SAFETY: base came from a successful mmap of this size.
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), REGISTER_BLOCK_SIZE);
        }
    }
}

/// The peripheral register blocks of one board.
///
/// The GPIO block is mandatory. The system timer, PWM and clock manager
/// blocks are only reachable through `/dev/mem`, so they are missing when
/// running unprivileged on `/dev/gpiomem`.
pub struct Peripherals {
    model: PiModel,
    gpio: RegisterBlock,
    timer: Option<RegisterBlock>,
    pwm: Option<RegisterBlock>,
    clock: Option<RegisterBlock>,
}

impl Peripherals {
    pub fn map() -> Result<Arc<Self>, Hub75Error> {
        Self::map_for(PiModel::detect())
    }

    pub fn map_for(model: PiModel) -> Result<Arc<Self>, Hub75Error> {
        let base = model.peripheral_base();
        let gpio = match RegisterBlock::map("/dev/mem", base + GPIO_REGISTER_OFFSET) {
            Ok(block) => block,
            Err(mem_err) => {
                warn!("/dev/mem not usable ({}), falling back to /dev/gpiomem", mem_err);
                RegisterBlock::map("/dev/gpiomem", 0).map_err(|err| {
                    if err.kind() == io::ErrorKind::PermissionDenied
                        || mem_err.kind() == io::ErrorKind::PermissionDenied
                    {
                        Hub75Error::Permission {
                            message: format!("cannot map GPIO registers: {}", err),
                        }
                    } else {
                        Hub75Error::from(err)
                    }
                })?
            }
        };
        let optional = |offset: u64| RegisterBlock::map("/dev/mem", base + offset).ok();
        let timer = optional(COUNTER_1MHZ_REGISTER_OFFSET);
        let pwm = optional(GPIO_PWM_BASE_OFFSET);
        let clock = optional(GPIO_CLK_BASE_OFFSET);

        info!(
            "mapped {:?} peripherals at {:#x} (timer: {}, pwm: {})",
            model,
            base,
            timer.is_some(),
            pwm.is_some() && clock.is_some()
        );
        Ok(Arc::new(Self {
            model,
            gpio,
            timer,
            pwm,
            clock,
        }))
    }

    pub fn model(&self) -> PiModel {
        self.model
    }

    pub fn gpio(&self) -> &RegisterBlock {
        &self.gpio
    }

    pub fn timer(&self) -> Option<&RegisterBlock> {
        self.timer.as_ref()
    }

    pub fn pwm(&self) -> Option<&RegisterBlock> {
        self.pwm.as_ref()
    }

    pub fn clock(&self) -> Option<&RegisterBlock> {
        self.clock.as_ref()
    }
}

/// Returns true if a kernel module with the given name is loaded.
pub fn linux_has_module_loaded(name: &str) -> bool {
    fs::read_to_string("/proc/modules")
        .map(|modules| {
            modules
                .lines()
                .any(|line| line.split_whitespace().next() == Some(name))
        })
        .unwrap_or(false)
}

/// Switch the process to an unprivileged user and group. Does nothing when
/// not running as root.
///
/// Must be called after all registers are mapped.
pub fn drop_privileges(user: &str, group: &str) -> Result<(), Hub75Error> {
    // SAFETY: geteuid has no preconditions
    if unsafe { libc::geteuid() } != 0 {
        return Ok(());
    }
    let permission = |message: String| Hub75Error::Permission { message };
    let c_user = CString::new(user).map_err(|_| permission(format!("bad user name '{}'", user)))?;
    let c_group =
        CString::new(group).map_err(|_| permission(format!("bad group name '{}'", group)))?;

    // SAFETY: getgrnam/getpwnam return pointers into static storage that we
    // read immediately; the set*id calls take plain integers.
    unsafe {
        let gr = libc::getgrnam(c_group.as_ptr());
        if gr.is_null() {
            return Err(permission(format!("unknown group '{}'", group)));
        }
        let gid = (*gr).gr_gid;
        if libc::setresgid(gid, gid, gid) != 0 {
            return Err(permission(format!(
                "setresgid({}): {}",
                gid,
                io::Error::last_os_error()
            )));
        }

        let pw = libc::getpwnam(c_user.as_ptr());
        if pw.is_null() {
            return Err(permission(format!("unknown user '{}'", user)));
        }
        let uid = (*pw).pw_uid;
        if libc::setresuid(uid, uid, uid) != 0 {
            return Err(permission(format!(
                "setresuid({}): {}",
                uid,
                io::Error::last_os_error()
            )));
        }
    }
    info!("dropped privileges to {}:{}", user, group);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_codes_map_to_models() {
        assert_eq!(PiModel::from_revision(RevisionCode(0x000e)), PiModel::Pi1);
        assert_eq!(PiModel::from_revision(RevisionCode(0x9000c1)), PiModel::Pi1);
        assert_eq!(PiModel::from_revision(RevisionCode(0xa01041)), PiModel::Pi2);
        assert_eq!(PiModel::from_revision(RevisionCode(0xa02082)), PiModel::Pi3);
        assert_eq!(PiModel::from_revision(RevisionCode(0xc03111)), PiModel::Pi4);
        assert_eq!(PiModel::from_revision(RevisionCode(0x902120)), PiModel::Pi2);
    }

    #[test]
    fn peripheral_bases() {
        assert_eq!(PiModel::Pi1.peripheral_base(), 0x2000_0000);
        assert_eq!(PiModel::Pi3.peripheral_base(), 0x3F00_0000);
        assert_eq!(PiModel::Pi4.peripheral_base(), 0xFE00_0000);
    }

    #[test]
    fn parses_cpuinfo() {
        let info = "processor\t: 0\nHardware\t: BCM2835\nRevision\t: a02082\nSerial\t: 0\n";
        assert_eq!(parse_cpuinfo_revision(info), Some(0xa02082));
        assert_eq!(parse_cpuinfo_revision("processor : 0\n"), None);
    }
}
