//! Default CPU and memory accessors for the current process.

use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::sources::{CpuReading, CpuSource, MemoryReading, MemorySource};

/// Reads user CPU time of the current process from the OS.
#[derive(Debug, Default)]
pub struct ProcessCpuSource {
    _private: (),
}

impl ProcessCpuSource {
    /// Creates a new process CPU source.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl CpuSource for ProcessCpuSource {
    fn processor_count(&self) -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }

    fn read(&self) -> Result<CpuReading> {
        let user_processor_time = get_user_cpu_time()?;
        Ok(CpuReading {
            wall_clock: SystemTime::now(),
            user_processor_time,
        })
    }
}

/// Reads memory usage of the current process from the OS.
#[derive(Debug, Default)]
pub struct ProcessMemorySource {
    _private: (),
}

impl ProcessMemorySource {
    /// Creates a new process memory source.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl MemorySource for ProcessMemorySource {
    fn read(&self) -> Result<MemoryReading> {
        get_memory_usage()
    }
}

/// Gets the user CPU time of the process.
#[cfg(unix)]
fn get_user_cpu_time() -> Result<Duration> {
    use std::mem;

    unsafe {
        let mut usage: libc::rusage = mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
            let secs = usage.ru_utime.tv_sec.max(0) as u64;
            let micros = usage.ru_utime.tv_usec.max(0) as u64;
            Ok(Duration::from_secs(secs) + Duration::from_micros(micros))
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }
}

/// Gets the user CPU time of the process.
#[cfg(target_os = "windows")]
fn get_user_cpu_time() -> Result<Duration> {
    use windows_sys::Win32::Foundation::FILETIME;
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetProcessTimes};

    unsafe {
        let process = GetCurrentProcess();
        let mut creation: FILETIME = std::mem::zeroed();
        let mut exit: FILETIME = std::mem::zeroed();
        let mut kernel: FILETIME = std::mem::zeroed();
        let mut user: FILETIME = std::mem::zeroed();

        if GetProcessTimes(process, &mut creation, &mut exit, &mut kernel, &mut user) != 0 {
            // FILETIME is in 100-nanosecond intervals
            let user_100ns = ((user.dwHighDateTime as u64) << 32) | (user.dwLowDateTime as u64);
            Ok(Duration::from_nanos(user_100ns.saturating_mul(100)))
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }
}

/// Fallback for unsupported platforms.
#[cfg(not(any(unix, target_os = "windows")))]
fn get_user_cpu_time() -> Result<Duration> {
    Err(crate::SamplerError::Unsupported {
        family: crate::MetricFamily::Cpu,
    })
}

/// Gets private and resident memory in bytes.
#[cfg(target_os = "linux")]
fn get_memory_usage() -> Result<MemoryReading> {
    // Format: size resident shared text lib data dt
    // Values are in pages
    let statm = std::fs::read_to_string("/proc/self/statm")?;
    let parts: Vec<&str> = statm.split_whitespace().collect();
    if parts.len() < 6 {
        return Err(crate::SamplerError::unavailable("malformed /proc/self/statm"));
    }

    let parse = |s: &str| {
        s.parse::<i64>()
            .map_err(|err| crate::SamplerError::unavailable(format!("bad statm value {s:?}: {err}")))
    };
    let resident_pages = parse(parts[1])?;
    let data_pages = parse(parts[5])?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as i64;

    Ok(MemoryReading {
        private_bytes: data_pages * page_size,
        working_set_bytes: resident_pages * page_size,
    })
}

/// Gets private and resident memory in bytes.
#[cfg(target_os = "macos")]
fn get_memory_usage() -> Result<MemoryReading> {
    use std::mem;

    unsafe {
        let mut info: libc::rusage = mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut info) == 0 {
            // On macOS, ru_maxrss is in bytes
            Ok(MemoryReading {
                private_bytes: info.ru_maxrss,
                working_set_bytes: info.ru_maxrss,
            })
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }
}

/// Gets private and resident memory in bytes.
#[cfg(target_os = "windows")]
fn get_memory_usage() -> Result<MemoryReading> {
    use windows_sys::Win32::System::ProcessStatus::{
        GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS,
    };
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    unsafe {
        let process = GetCurrentProcess();
        let mut pmc: PROCESS_MEMORY_COUNTERS = std::mem::zeroed();
        pmc.cb = std::mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;

        if GetProcessMemoryInfo(
            process,
            &mut pmc,
            std::mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32,
        ) != 0
        {
            Ok(MemoryReading {
                private_bytes: pmc.PagefileUsage as i64,
                working_set_bytes: pmc.WorkingSetSize as i64,
            })
        } else {
            Err(std::io::Error::last_os_error().into())
        }
    }
}

/// Fallback for unsupported platforms.
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn get_memory_usage() -> Result<MemoryReading> {
    Err(crate::SamplerError::Unsupported {
        family: crate::MetricFamily::Memory,
    })
}
