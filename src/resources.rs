use std::thread;

use sysinfo::System;

use crate::error::GearError;
use crate::progress::ProgressSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuAllocation {
    pub n_cpus: usize,
    pub omp_threads: usize,
}

pub fn available_cpus() -> Result<usize, GearError> {
    thread::available_parallelism()
        .map(|count| count.get())
        .map_err(|err| GearError::Resources(format!("available cpus: {err}")))
}

/// Caps the requested CPU and OpenMP thread counts at what the machine
/// offers. Unset or zero requests use every available CPU.
pub fn determine_n_cpus(
    n_cpus: Option<usize>,
    omp_threads: Option<usize>,
    sink: &dyn ProgressSink,
) -> Result<CpuAllocation, GearError> {
    let available = available_cpus()?;
    Ok(allocate_cpus(n_cpus, omp_threads, available, sink))
}

pub fn allocate_cpus(
    n_cpus: Option<usize>,
    omp_threads: Option<usize>,
    available: usize,
    sink: &dyn ProgressSink,
) -> CpuAllocation {
    CpuAllocation {
        n_cpus: cap(n_cpus, available, "n_cpus", sink),
        omp_threads: cap(omp_threads, available, "omp_nthreads", sink),
    }
}

fn cap(requested: Option<usize>, available: usize, name: &str, sink: &dyn ProgressSink) -> usize {
    match requested.filter(|count| *count > 0) {
        None => {
            sink.info(format!("{name} using maximum available: {available}"));
            available
        }
        Some(count) if count > available => {
            sink.warn(format!(
                "{name} ({count}) greater than available ({available}); using {available}"
            ));
            available
        }
        Some(count) => count,
    }
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Total and currently available system memory, in GiB.
pub fn system_memory_gib() -> Result<(f64, f64), GearError> {
    let mut system = System::new();
    system.refresh_memory();
    let available = system.available_memory();
    if available == 0 {
        return Err(GearError::Resources(
            "available memory reported as zero".to_string(),
        ));
    }
    Ok((system.total_memory() as f64 / GIB, available as f64 / GIB))
}

/// Caps the requested memory (GiB) at what the machine has free. Unset,
/// zero or oversized requests get one GiB less than the whole free GiBs.
pub fn determine_max_mem(
    requested_gib: Option<f64>,
    sink: &dyn ProgressSink,
) -> Result<f64, GearError> {
    let (total, available) = system_memory_gib()?;
    sink.info(format!("Systems memory: {} GiB", total as u64));
    Ok(allocate_mem(requested_gib, available, sink))
}

pub fn allocate_mem(requested_gib: Option<f64>, available_gib: f64, sink: &dyn ProgressSink) -> f64 {
    sink.info(format!("Available memory: {} GiB", available_gib as u64));
    let fallback = (available_gib.floor() - 1.0).max(0.0);
    match requested_gib.filter(|gib| *gib > 0.0) {
        None => {
            sink.info(format!("Setting memory usage to {fallback} GiB"));
            fallback
        }
        Some(gib) if gib > available_gib => {
            sink.warn("Requested more memory than available".to_string());
            sink.warn(format!("Setting memory usage to {fallback} GiB"));
            fallback
        }
        Some(gib) => {
            sink.info(format!("Using {gib} GiB (from config)"));
            gib
        }
    }
}
