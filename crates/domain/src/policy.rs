//! Tuning Policy (C2, spec.md §4.2): a pure function of observed
//! resources and load. No I/O; `crates/infrastructure` supplies the
//! `memory_mb`/`cpu_count` inputs from the Resource Probe (C1).

/// Segment-duration bounds and concurrency target, overridable via
/// environment (`config` crate) before being passed in here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyLimits {
    pub min_segment_seconds: u32,
    pub max_segment_seconds: u32,
    pub target_streams_per_segment: u32,
    /// `MAX_CONCURRENT_FFMPEG`: wins over the computed concurrency cap
    /// when present (spec.md §4.2: "Environment overrides, when
    /// present, win over computed values").
    pub max_concurrent_override: Option<usize>,
    /// `FFMPEG_THREADS`: wins over the computed per-transcoder thread
    /// count when present.
    pub threads_per_transcoder_override: Option<usize>,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            min_segment_seconds: 4,
            max_segment_seconds: 10,
            target_streams_per_segment: 10,
            max_concurrent_override: None,
            threads_per_transcoder_override: None,
        }
    }
}

/// Output of the Tuning Policy for a given resource reading and load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningDecision {
    pub max_concurrent: usize,
    pub threads_per_transcoder: usize,
    pub segment_duration_seconds: u32,
}

fn per_ffmpeg_mb(memory_mb: u64) -> u64 {
    if memory_mb < 700 {
        256
    } else if memory_mb < 1500 {
        512
    } else {
        800
    }
}

/// Computes `(max_concurrent, threads_per_transcoder, segment_duration)`
/// from `(memory_mb, cpu_count, active_session_count)` (spec.md §4.2).
pub fn tune(
    memory_mb: u64,
    cpu_count: usize,
    active_session_count: usize,
    limits: PolicyLimits,
) -> TuningDecision {
    let per_mb = per_ffmpeg_mb(memory_mb);
    let memory_bound = (memory_mb as f64 / (per_mb as f64 * 1.2)).floor() as usize;
    let cpu_bound = cpu_count / 2;
    let max_concurrent = limits
        .max_concurrent_override
        .unwrap_or_else(|| memory_bound.min(cpu_bound).max(1));

    let threads_per_transcoder = limits.threads_per_transcoder_override.unwrap_or_else(|| {
        if memory_mb < 1024 {
            1
        } else {
            (cpu_count / 2).max(1)
        }
    });

    let segment_duration = {
        let raw = (active_session_count as u32).div_ceil(limits.target_streams_per_segment)
            * limits.min_segment_seconds;
        raw.clamp(limits.min_segment_seconds, limits.max_segment_seconds)
    };

    TuningDecision {
        max_concurrent,
        threads_per_transcoder,
        segment_duration_seconds: segment_duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_memory_uses_256mb_per_transcoder() {
        let d = tune(500, 4, 0, PolicyLimits::default());
        // memory_bound = floor(500 / (256*1.2)) = floor(1.627) = 1
        // cpu_bound = 4/2 = 2 -> min(1,2) = 1
        assert_eq!(d.max_concurrent, 1);
        assert_eq!(d.threads_per_transcoder, 1);
    }

    #[test]
    fn mid_memory_boundary_is_512mb_tier() {
        let d = tune(1499, 8, 0, PolicyLimits::default());
        // per_ffmpeg_mb = 512 (since 1499 < 1500)
        // memory_bound = floor(1499 / 614.4) = 2
        assert_eq!(d.max_concurrent, 2);
    }

    #[test]
    fn high_memory_uses_800mb_tier() {
        let d = tune(8000, 16, 0, PolicyLimits::default());
        // per_ffmpeg_mb = 800; memory_bound = floor(8000/960) = 8
        // cpu_bound = 8 -> min(8,8) = 8
        assert_eq!(d.max_concurrent, 8);
        assert_eq!(d.threads_per_transcoder, 8);
    }

    #[test]
    fn max_concurrent_never_below_one() {
        let d = tune(100, 1, 0, PolicyLimits::default());
        assert_eq!(d.max_concurrent, 1);
    }

    #[test]
    fn segment_duration_grows_with_load_and_clamps() {
        let limits = PolicyLimits::default();
        assert_eq!(tune(4000, 8, 0, limits).segment_duration_seconds, 4);
        assert_eq!(tune(4000, 8, 1, limits).segment_duration_seconds, 4);
        assert_eq!(tune(4000, 8, 10, limits).segment_duration_seconds, 4);
        assert_eq!(tune(4000, 8, 11, limits).segment_duration_seconds, 8);
        // ceil(25/10)=3 segments of min duration -> 12, clamps to max 10
        assert_eq!(tune(4000, 8, 25, limits).segment_duration_seconds, 10);
    }

    #[test]
    fn threads_per_transcoder_below_1024mb_is_one() {
        let d = tune(1023, 16, 0, PolicyLimits::default());
        assert_eq!(d.threads_per_transcoder, 1);
    }

    #[test]
    fn env_overrides_win_over_computed_values() {
        let limits = PolicyLimits {
            max_concurrent_override: Some(99),
            threads_per_transcoder_override: Some(7),
            ..PolicyLimits::default()
        };
        let d = tune(500, 4, 0, limits);
        assert_eq!(d.max_concurrent, 99);
        assert_eq!(d.threads_per_transcoder, 7);
    }
}
