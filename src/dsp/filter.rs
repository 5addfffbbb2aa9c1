use super::design::{Biquad, FilterCoefficients};

/// Direct Form I state for one section.
#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl SectionState {
    #[inline]
    fn process(&mut self, input: f64, c: &Biquad) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }
}

/// Causal, stateful filter running a cascade of second-order sections.
#[derive(Debug, Clone)]
pub struct CascadeFilter {
    sections: Vec<Biquad>,
    states: Vec<SectionState>,
}

impl CascadeFilter {
    pub fn new(coeffs: &FilterCoefficients) -> Self {
        Self {
            sections: coeffs.sections.clone(),
            states: vec![SectionState::default(); coeffs.sections.len()],
        }
    }

    pub fn process_sample(&mut self, input: f32) -> f32 {
        let mut x = input as f64;
        for (state, section) in self.states.iter_mut().zip(&self.sections) {
            x = state.process(x, section);
        }
        x as f32
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        input.iter().map(|&x| self.process_sample(x)).collect()
    }

    pub fn reset(&mut self) {
        self.states.iter_mut().for_each(|s| *s = SectionState::default());
    }
}

/// Filter `input` from a zero initial state.
pub fn apply_filter(coeffs: &FilterCoefficients, input: &[f32]) -> Vec<f32> {
    CascadeFilter::new(coeffs).process(input)
}
