/// Per-session bookkeeping carried across decode calls.
#[derive(Debug, Clone, Default)]
pub struct DecoderState {
    /// Raw per-frame class ids of the last successful call, blanks included.
    pub ids: Vec<i32>,
    /// Cumulative wall time of successful decode calls, in microseconds.
    pub t_decode_us: u64,
    pub n_decode: u64,
}

impl DecoderState {
    pub(super) fn record(&mut self, ids: Vec<i32>, elapsed_us: u64) {
        self.ids = ids;
        self.t_decode_us = self.t_decode_us.saturating_add(elapsed_us);
        self.n_decode += 1;
    }

    pub fn timings(&self) -> DecodeTimings {
        DecodeTimings {
            t_decode_us: self.t_decode_us,
            n_decode: self.n_decode,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeTimings {
    pub t_decode_us: u64,
    pub n_decode: u64,
}

impl DecodeTimings {
    pub fn avg_decode_us(&self) -> u64 {
        if self.n_decode == 0 {
            0
        } else {
            self.t_decode_us / self.n_decode
        }
    }
}
