use rand::Rng;
use rand::rngs::StdRng;
use std::time::Duration;
use whex_task::WheelSource;
use whex_timing::Timer;

/// Simulated animal turning the wheel in random bouts.
///
/// Between bouts the wheel is perfectly still; a bout turns it at a
/// constant speed in one direction.
pub struct SimulatedSubject<T> {
    timer: T,
    rng: StdRng,
    angle_deg: f32,
    last_ns: u64,
    bout: Option<Bout>,
    bouts_per_s: f64,
}

#[derive(Debug, Clone, Copy)]
struct Bout {
    speed_deg_s: f32,
    ends_ns: u64,
}

impl<T: Timer<Timestamp = u64>> SimulatedSubject<T> {
    pub fn new(timer: T, rng: StdRng) -> Self {
        let last_ns = timer.now();
        Self {
            timer,
            rng,
            angle_deg: 0.0,
            last_ns,
            bout: None,
            bouts_per_s: 0.4,
        }
    }

    fn start_bout(&mut self, now_ns: u64) {
        let direction = if self.rng.random_bool(0.5) { 1.0 } else { -1.0 };
        let speed = self.rng.random_range(60.0..180.0f32);
        let length = Duration::from_millis(self.rng.random_range(300..1500));
        self.bout = Some(Bout {
            speed_deg_s: direction * speed,
            ends_ns: now_ns + length.as_nanos() as u64,
        });
    }
}

impl<T: Timer<Timestamp = u64>> WheelSource for SimulatedSubject<T> {
    fn read(&mut self) -> f32 {
        let now_ns = self.timer.now();
        let dt_s = now_ns.saturating_sub(self.last_ns) as f64 / 1e9;
        self.last_ns = now_ns;

        match self.bout {
            Some(bout) => {
                self.angle_deg += bout.speed_deg_s * dt_s as f32;
                if now_ns >= bout.ends_ns {
                    self.bout = None;
                }
            }
            None => {
                if self.rng.random_bool((self.bouts_per_s * dt_s).min(1.0)) {
                    self.start_bout(now_ns);
                }
            }
        }
        self.angle_deg
    }
}
