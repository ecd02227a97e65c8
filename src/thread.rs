//! Scheduling tweaks for the refresh thread. None of them are required for
//! correct output, they only reduce flicker, so failures are reported and
//! otherwise ignored by the callers.

use std::fs;
use std::io;
use std::os::unix::thread::RawPthread;

use log::info;
use log::warn;

use crate::error::Hub75Error;
use crate::platform::PiModel;

/// Run `thread` under `SCHED_FIFO` with the given priority.
///
/// Meant to be called by the thread that spawned `thread`, before it gives up
/// the privileges this requires.
pub fn set_realtime_priority(thread: RawPthread, priority: i32) -> Result<(), Hub75Error> {
    // SAFETY: sched_param is plain data; the handle belongs to a thread that
    // has not been joined yet
    let result = unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();
        param.sched_priority = priority;
        libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param)
    };
    if result != 0 {
        return Err(Hub75Error::Permission {
            message: format!(
                "realtime priority {priority}: {}",
                io::Error::from_raw_os_error(result)
            ),
        });
    }
    Ok(())
}

/// Restrict `thread` to one CPU core.
pub fn pin_to_cpu(thread: RawPthread, cpu: usize) -> Result<(), Hub75Error> {
    // SAFETY: cpu_set_t is plain data, CPU_SET stays within it for cpu < CPU_SETSIZE
    let result = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::pthread_setaffinity_np(thread, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if result != 0 {
        return Err(Hub75Error::hardware(format!(
            "affinity to cpu {cpu}: {}",
            io::Error::from_raw_os_error(result)
        )));
    }
    Ok(())
}

/// Apply priority and affinity to a freshly spawned refresh thread.
pub(crate) fn tune_refresh_thread(thread: RawPthread, priority: Option<i32>, cpu: Option<usize>) {
    if let Some(priority) = priority {
        if let Err(err) = set_realtime_priority(thread, priority) {
            warn!("refresh thread keeps normal priority: {err}");
        }
    }
    if let Some(cpu) = cpu {
        if let Err(err) = pin_to_cpu(thread, cpu) {
            warn!("refresh thread not pinned: {err}");
        }
    }
}

fn write_kernel_setting(path: &str, value: &str) {
    if let Err(err) = fs::write(path, value) {
        warn!("could not write {value} to {path}: {err}");
    }
}

/// Kernel settings that keep the refresh thread from being throttled.
pub fn tune_kernel(model: PiModel) {
    if model.cores() > 1 {
        // the default rt budget pauses realtime threads every second
        write_kernel_setting("/proc/sys/kernel/sched_rt_runtime_us", "990000");
        write_kernel_setting(
            "/sys/devices/system/cpu/cpu3/cpufreq/scaling_governor",
            "performance",
        );
        let isolated = fs::read_to_string("/proc/cmdline")
            .map(|cmdline| cmdline.contains("isolcpus=3"))
            .unwrap_or(false);
        if !isolated {
            info!("add isolcpus=3 to /boot/cmdline.txt to reserve a core for the display");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::thread::JoinHandleExt;
    use std::sync::mpsc;

    use super::*;

    fn allowed_cpus() -> Vec<usize> {
        // SAFETY: cpu_set_t is plain data
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            let size = std::mem::size_of::<libc::cpu_set_t>();
            assert_eq!(libc::sched_getaffinity(0, size, &mut set), 0);
            (0..libc::CPU_SETSIZE as usize)
                .filter(|&cpu| libc::CPU_ISSET(cpu, &set))
                .collect()
        }
    }

    #[test]
    fn affinity_is_set_from_the_spawning_thread() {
        let cpu = allowed_cpus()[0];
        let (go, wait) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            wait.recv().unwrap();
            allowed_cpus()
        });
        pin_to_cpu(handle.as_pthread_t(), cpu).unwrap();
        go.send(()).unwrap();
        assert_eq!(handle.join().unwrap(), vec![cpu]);
    }
}
