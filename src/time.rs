use std::time::{Duration, Instant};

/// Frame timing. `tick` is called once at the start of every frame.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last_frame: Option<Instant>,
    delta: Duration,
    frame: u64,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last_frame: None,
            delta: Duration::ZERO,
            frame: 0,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    fn tick_at(&mut self, now: Instant) {
        self.delta = match self.last_frame {
            Some(last) => now.saturating_duration_since(last),
            None => Duration::ZERO,
        };
        self.last_frame = Some(now);
        self.frame += 1;
    }

    /// Seconds since the previous frame; zero on the first frame.
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed_seconds(&self) -> f64 {
        match self.last_frame {
            Some(last) => last.saturating_duration_since(self.start).as_secs_f64(),
            None => 0.0,
        }
    }

    /// Number of frames ticked so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_zero_delta() {
        let mut clock = FrameClock::new();
        let start = clock.start;
        clock.tick_at(start + Duration::from_millis(5));
        assert_eq!(clock.delta_seconds(), 0.0);

        clock.tick_at(start + Duration::from_millis(21));
        assert!((clock.delta_seconds() - 0.016).abs() < 1e-6);
        assert!((clock.elapsed_seconds() - 0.021).abs() < 1e-9);
        assert_eq!(clock.frame(), 2);
    }
}
