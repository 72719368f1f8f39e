#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub tokens: Vec<String>,
    pub token_ids: Vec<i32>,
    /// Start time of each emitted token, in seconds from the first frame.
    pub timestamps: Vec<f32>,
    /// Softmax probability of each emitted token's winning class.
    pub confidences: Vec<f32>,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }

    /// Shifts timestamps when the encoder output was one chunk of a longer
    /// recording.
    pub fn offset_timestamps(&mut self, offset_sec: f32) {
        if offset_sec.abs() < f32::EPSILON {
            return;
        }
        for timestamp in &mut self.timestamps {
            *timestamp += offset_sec;
        }
    }
}
