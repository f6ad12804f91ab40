use std::path::Path;

use tempfile::TempPath;
use tracing::debug;

use crate::audio::{PcmAudio, wav};
use crate::error::{PipelineError, PipelineResult};
use crate::vad::VoiceRegion;

/// One bounded slice of the input audio.
///
/// Carries its own copy of the samples and, when the audio was actually
/// split, a scratch WAV holding them. The scratch file is removed when the
/// segment is dropped.
#[derive(Debug)]
pub struct AudioSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub samples: Vec<i16>,
    scratch: Option<TempPath>,
}

impl AudioSegment {
    pub fn start_sec(&self) -> f64 {
        self.start_ms as f64 / 1000.0
    }

    pub fn end_sec(&self) -> f64 {
        self.end_ms as f64 / 1000.0
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_deref()
    }
}

/// VAD-guided greedy-merge segmenter.
///
/// Produces an ordered, non-overlapping sequence of segments no longer than
/// `max_segment_sec`, cutting on voice-activity boundaries where possible
/// and force-splitting inside over-long voice regions otherwise.
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    max_ms: u64,
    min_ms: u64,
}

impl Splitter {
    pub fn new(max_segment_sec: f64, min_segment_sec: f64) -> PipelineResult<Self> {
        if !(max_segment_sec > 0.1 && max_segment_sec <= 55.0) {
            return Err(PipelineError::InvalidMessage(format!(
                "max_segment_sec must be in (0.1, 55], got {max_segment_sec}"
            )));
        }
        if !(min_segment_sec > 0.01 && min_segment_sec <= 55.0) {
            return Err(PipelineError::InvalidMessage(format!(
                "min_segment_sec must be in (0.01, 55], got {min_segment_sec}"
            )));
        }
        if min_segment_sec > max_segment_sec {
            return Err(PipelineError::InvalidMessage(format!(
                "min_segment_sec ({min_segment_sec}) exceeds max_segment_sec ({max_segment_sec})"
            )));
        }
        Ok(Self {
            max_ms: (max_segment_sec * 1000.0) as u64,
            min_ms: (min_segment_sec * 1000.0) as u64,
        })
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    pub fn min_ms(&self) -> u64 {
        self.min_ms
    }

    /// Plans cut points over `[0, total_ms]` from VAD voice regions.
    ///
    /// With no regions the audio is sliced at fixed `max` intervals.
    pub fn plan(&self, regions: &[VoiceRegion], total_ms: u64) -> Vec<(u64, u64)> {
        let planned = if regions.is_empty() {
            self.fixed_slices(total_ms)
        } else {
            self.merge_regions(regions, total_ms)
        };
        if planned.is_empty() {
            return self.fixed_slices(total_ms);
        }
        planned
    }

    /// Greedy merge: absorb regions while the accumulated span stays under
    /// `max`, cut at the previous region's end when the next one would
    /// overflow, and force-split inside regions that alone exceed `max`.
    fn merge_regions(&self, regions: &[VoiceRegion], total_ms: u64) -> Vec<(u64, u64)> {
        let mut out: Vec<(u64, u64)> = Vec::new();
        let mut current_start: u64 = 0;
        let mut last_absorbed_end: u64 = 0;
        let mut i = 0;

        while i < regions.len() {
            let (seg_start, seg_end) = regions[i];
            let seg_end = seg_end.min(total_ms);
            if seg_start >= seg_end {
                i += 1;
                continue;
            }

            if seg_end - current_start <= self.max_ms {
                // Absorb and advance
                last_absorbed_end = seg_end;
                i += 1;
                if i == regions.len() && seg_end > current_start {
                    out.push((current_start, seg_end));
                }
            } else if last_absorbed_end > current_start {
                // Cut at the previous region's end and re-evaluate this
                // region against the new start
                out.push((current_start, last_absorbed_end));
                current_start = last_absorbed_end;
            } else {
                // The region alone overflows the bound. Emit the leading
                // silence gap when it forms a legal segment on its own,
                // then slice the region at exact `max` boundaries.
                if seg_start > current_start {
                    let gap = seg_start - current_start;
                    if gap > self.max_ms {
                        current_start = seg_start;
                    } else if gap >= self.min_ms {
                        out.push((current_start, seg_start));
                        current_start = seg_start;
                    }
                }
                while seg_end - current_start > self.max_ms {
                    out.push((current_start, current_start + self.max_ms));
                    current_start += self.max_ms;
                }
                last_absorbed_end = seg_end;
                i += 1;
                if i == regions.len() && seg_end > current_start {
                    out.push((current_start, seg_end));
                }
            }
        }

        // Trailing audio past the last voice region, sliced so the tail
        // itself cannot overflow the bound
        if let Some(&(_, last_end)) = out.last()
            && total_ms > last_end
            && total_ms - last_end >= self.min_ms
        {
            let mut cur = last_end;
            while total_ms - cur > self.max_ms {
                out.push((cur, cur + self.max_ms));
                cur += self.max_ms;
            }
            if total_ms > cur {
                out.push((cur, total_ms));
            }
        }

        out
    }

    /// Equal slices of `max` when VAD found nothing; a trailing slice is
    /// kept only when it reaches `min`.
    fn fixed_slices(&self, total_ms: u64) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        let mut current = 0;
        while current < total_ms {
            let end = (current + self.max_ms).min(total_ms);
            if end - current >= self.min_ms {
                out.push((current, end));
            }
            current = end;
        }
        out
    }

    /// Materializes a plan: copies each span's samples and writes a scratch
    /// WAV per segment into `scratch_dir`.
    pub fn cut(
        &self,
        audio: &PcmAudio,
        plan: &[(u64, u64)],
        scratch_dir: &Path,
    ) -> PipelineResult<Vec<AudioSegment>> {
        std::fs::create_dir_all(scratch_dir)?;

        let mut segments = Vec::with_capacity(plan.len());
        for (index, &(start_ms, end_ms)) in plan.iter().enumerate() {
            let start_sample = (start_ms * 16) as usize;
            let end_sample = ((end_ms * 16) as usize).min(audio.samples.len());
            if start_sample >= end_sample {
                continue;
            }
            let samples = audio.samples[start_sample..end_sample].to_vec();

            let scratch = tempfile::Builder::new()
                .prefix(&format!("segment_{index:03}_"))
                .suffix(".wav")
                .tempfile_in(scratch_dir)?
                .into_temp_path();
            wav::write_wav(&scratch, &samples)
                .map_err(|e| PipelineError::Transient(e.to_string()))?;

            debug!(
                index,
                start_ms,
                end_ms,
                path = %scratch.display(),
                "segment scratch written"
            );
            segments.push(AudioSegment {
                start_ms,
                end_ms,
                samples,
                scratch: Some(scratch),
            });
        }
        Ok(segments)
    }

    /// Wraps the entire input as a single segment; no scratch file needed.
    pub fn whole(audio: &PcmAudio) -> AudioSegment {
        AudioSegment {
            start_ms: 0,
            end_ms: audio.duration_ms(),
            samples: audio.samples.clone(),
            scratch: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_plan_invariants(plan: &[(u64, u64)], max_ms: u64, total_ms: u64) {
        let mut prev_end = 0;
        for &(start, end) in plan {
            assert!(start < end, "degenerate span ({start}, {end})");
            assert!(end - start <= max_ms, "span ({start}, {end}) exceeds {max_ms}");
            assert!(start >= prev_end, "overlap at ({start}, {end})");
            assert!(end <= total_ms, "span ({start}, {end}) past {total_ms}");
            prev_end = end;
        }
    }

    #[test]
    fn rejects_out_of_range_bounds() {
        assert!(Splitter::new(0.05, 0.02).is_err());
        assert!(Splitter::new(60.0, 0.8).is_err());
        assert!(Splitter::new(6.0, 8.0).is_err());
        assert!(Splitter::new(6.0, 0.8).is_ok());
    }

    #[test]
    fn merges_regions_under_the_bound() {
        let splitter = Splitter::new(6.0, 0.5).unwrap();
        let regions = vec![(500, 2000), (2500, 4000), (4500, 5500)];
        let plan = splitter.plan(&regions, 5800);
        assert_eq!(plan, vec![(0, 5500)]);
    }

    #[test]
    fn cuts_at_previous_region_end_on_overflow() {
        let splitter = Splitter::new(6.0, 0.5).unwrap();
        let regions = vec![(0, 3000), (3500, 5500), (6000, 9000)];
        let plan = splitter.plan(&regions, 10_000);
        assert_eq!(plan, vec![(0, 5500), (5500, 9000), (9000, 10_000)]);
        assert_plan_invariants(&plan, 6000, 10_000);
    }

    #[test]
    fn force_splits_an_oversized_region() {
        let splitter = Splitter::new(6.0, 0.5).unwrap();
        let regions = vec![(0, 15_000)];
        let plan = splitter.plan(&regions, 15_000);
        assert_eq!(plan, vec![(0, 6000), (6000, 12_000), (12_000, 15_000)]);
        assert_plan_invariants(&plan, 6000, 15_000);
    }

    #[test]
    fn drops_silence_gaps_longer_than_max() {
        let splitter = Splitter::new(6.0, 0.8).unwrap();
        let regions = vec![(0, 1000), (50_000, 57_000)];
        let plan = splitter.plan(&regions, 60_000);
        assert_eq!(
            plan,
            vec![(0, 1000), (50_000, 56_000), (56_000, 57_000), (57_000, 60_000)]
        );
        assert_plan_invariants(&plan, 6000, 60_000);
    }

    #[test]
    fn fixed_fallback_drops_short_tail() {
        let splitter = Splitter::new(6.0, 0.8).unwrap();
        assert_eq!(
            splitter.plan(&[], 15_000),
            vec![(0, 6000), (6000, 12_000), (12_000, 15_000)]
        );
        assert_eq!(
            splitter.plan(&[], 12_500),
            vec![(0, 6000), (6000, 12_000)]
        );
    }

    #[test]
    fn clamps_region_ends_to_total_duration() {
        let splitter = Splitter::new(6.0, 0.5).unwrap();
        let regions = vec![(0, 4000), (4500, 10_300)];
        let plan = splitter.plan(&regions, 10_050);
        assert_plan_invariants(&plan, 6000, 10_050);
        assert_eq!(plan.last().unwrap().1, 10_050);
    }

    #[test]
    fn plan_invariants_hold_across_shapes() {
        let splitter = Splitter::new(5.0, 0.5).unwrap();
        let cases: Vec<(Vec<VoiceRegion>, u64)> = vec![
            (vec![(0, 20_000)], 20_000),
            (vec![(100, 900), (1000, 1900), (12_000, 30_000)], 31_000),
            (vec![(0, 4999), (5000, 9999), (10_000, 14_999)], 15_000),
            (vec![(3000, 3100)], 60_000),
            (vec![(0, 100), (200, 300), (400, 500)], 600),
        ];
        for (regions, total) in cases {
            let plan = splitter.plan(&regions, total);
            assert_plan_invariants(&plan, 5000, total);
            assert!(!plan.is_empty());
        }
    }

    #[test]
    fn cut_writes_and_cleans_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let splitter = Splitter::new(1.0, 0.1).unwrap();
        let audio = PcmAudio::from_samples(vec![1000; 16_000 * 3]);
        let plan = splitter.plan(&[], audio.duration_ms());
        let segments = splitter.cut(&audio, &plan, dir.path()).unwrap();
        assert_eq!(segments.len(), 3);

        let paths: Vec<std::path::PathBuf> = segments
            .iter()
            .map(|s| s.scratch_path().unwrap().to_path_buf())
            .collect();
        for path in &paths {
            assert!(path.exists());
        }
        assert_eq!(segments[1].samples.len(), 16_000);
        assert_eq!(segments[2].start_ms, 2000);

        drop(segments);
        for path in &paths {
            assert!(!path.exists(), "scratch file survived: {}", path.display());
        }
    }
}
