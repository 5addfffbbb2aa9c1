//! Segment filter engine.
//!
//! The signal is cut into fixed windows of `switch_interval` seconds. Each
//! window gets its own low-pass or high-pass filter. The class flips at random
//! with `random_switch_prob` and the cutoff is drawn from the class's range.
//! Windows are filtered independently from a zero state. At every boundary
//! the first `transition_duration` seconds fade linearly from the previous
//! window's filter (kept running over the new samples) into the new one.
//!
//! Random choices are made up front in [`SegmentFilterEngine::plan`], so
//! [`SegmentFilterEngine::render`] is deterministic for a given plan.

use rand::Rng;
use std::sync::Arc;

use super::design::{design, FilterClass, FilterCoefficients};
use super::filter::CascadeFilter;
use super::round_to;
use crate::config::FilterConfig;
use crate::error::FilterDesignError;
use crate::status::{FilterParams, StatusBoard};

/// Filter choice for one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPlan {
    pub class: FilterClass,
    pub cutoff_hz: f64,
    /// First sample of the window.
    pub start: usize,
    pub len: usize,
}

impl SegmentPlan {
    pub fn position_secs(&self, sample_rate: u32) -> f64 {
        self.start as f64 / sample_rate as f64
    }
}

pub struct SegmentFilterEngine {
    settings: FilterConfig,
    status: Option<Arc<StatusBoard>>,
}

impl SegmentFilterEngine {
    pub fn new(settings: FilterConfig) -> Self {
        Self { settings, status: None }
    }

    /// Publish each window's filter parameters to `status` while rendering.
    pub fn with_status(mut self, status: Arc<StatusBoard>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn settings(&self) -> &FilterConfig {
        &self.settings
    }

    pub fn segment_len(&self, sample_rate: u32) -> usize {
        ((self.settings.switch_interval * sample_rate as f64) as usize).max(1)
    }

    pub fn transition_len(&self, sample_rate: u32) -> usize {
        (self.settings.transition_duration * sample_rate as f64) as usize
    }

    /// Filter `signal`; the output always has the same length as the input.
    pub fn process<R: Rng + ?Sized>(
        &self,
        signal: &[f32],
        sample_rate: u32,
        rng: &mut R,
    ) -> Result<Vec<f32>, FilterDesignError> {
        let plans = self.plan(signal.len(), sample_rate, rng);
        self.render(signal, sample_rate, &plans)
    }

    /// Draw class and cutoff for every window of a signal of `len` samples.
    pub fn plan<R: Rng + ?Sized>(&self, len: usize, sample_rate: u32, rng: &mut R) -> Vec<SegmentPlan> {
        let segment_len = self.segment_len(sample_rate);
        let mut class = if rng.gen_bool(0.5) {
            FilterClass::Lowpass
        } else {
            FilterClass::Highpass
        };

        let mut plans = Vec::with_capacity(len.div_ceil(segment_len));
        let mut start = 0;
        while start < len {
            if rng.gen_bool(self.settings.random_switch_prob) {
                class = class.other();
            }
            let [lo, hi] = match class {
                FilterClass::Lowpass => self.settings.lowpass_range,
                FilterClass::Highpass => self.settings.highpass_range,
            };
            let cutoff_hz = if lo < hi { rng.gen_range(lo..=hi) } else { lo };
            let window = segment_len.min(len - start);
            plans.push(SegmentPlan {
                class,
                cutoff_hz,
                start,
                len: window,
            });
            start += window;
        }
        plans
    }

    /// Apply a plan to `signal`, crossfading every boundary after the first.
    pub fn render(
        &self,
        signal: &[f32],
        sample_rate: u32,
        plans: &[SegmentPlan],
    ) -> Result<Vec<f32>, FilterDesignError> {
        let transition_len = self.transition_len(sample_rate);
        let mut output = vec![0.0f32; signal.len()];
        let mut previous: Option<CascadeFilter> = None;

        for plan in plans {
            if plan.len == 0 {
                continue;
            }
            let coeffs = self.design_for(plan, sample_rate)?;
            self.announce(plan, sample_rate);

            let window = &signal[plan.start..plan.start + plan.len];
            let mut current = CascadeFilter::new(&coeffs);
            let filtered = current.process(window);
            let out = &mut output[plan.start..plan.start + plan.len];

            match previous.as_mut() {
                Some(prev) if transition_len > 0 => {
                    let fade = transition_len.min(window.len());
                    for t in 0..fade {
                        let tail = prev.process_sample(window[t]);
                        let w = t as f32 / transition_len as f32;
                        out[t] = w * filtered[t] + (1.0 - w) * tail;
                    }
                    out[fade..].copy_from_slice(&filtered[fade..]);
                }
                _ => out.copy_from_slice(&filtered),
            }
            previous = Some(current);
        }

        Ok(output)
    }

    fn design_for(&self, plan: &SegmentPlan, sample_rate: u32) -> Result<FilterCoefficients, FilterDesignError> {
        design(plan.class, plan.cutoff_hz, sample_rate, self.settings.order)
    }

    fn announce(&self, plan: &SegmentPlan, sample_rate: u32) {
        log::info!("Applying {} at {:.1}Hz", plan.class, plan.cutoff_hz);
        if let Some(status) = &self.status {
            status.publish_filter(FilterParams {
                kind: plan.class,
                cutoff: round_to(plan.cutoff_hz, 1),
                position: round_to(plan.position_secs(sample_rate), 1),
            });
        }
    }
}
