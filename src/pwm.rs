//! Two channel PWM crossfade, the "hello world" of a PWM driver.
//!
//! Channel A fades out while channel B fades in, then the other way around, forever.

use embedded_hal::pwm::SetDutyCycle;

/// Number of steps of each half of the fade
pub const FADE_STEPS: u8 = 100;

/// Endless sequence of `(a, b)` duty cycles, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crossfade {
    step: u8,
    reversed: bool,
}

impl Crossfade {
    pub const fn new() -> Self {
        Self {
            step: 0,
            reversed: false,
        }
    }
}

impl Iterator for Crossfade {
    type Item = (u8, u8);

    fn next(&mut self) -> Option<Self::Item> {
        let rising = self.step;
        let falling = FADE_STEPS - self.step;
        let duty = if self.reversed {
            (rising, falling)
        } else {
            (falling, rising)
        };

        self.step += 1;
        if self.step == FADE_STEPS {
            self.step = 0;
            self.reversed = !self.reversed;
        }
        Some(duty)
    }
}

/// Two PWM outputs driven by a [`Crossfade`]
pub struct PwmPair<A, B> {
    a: A,
    b: B,
    fade: Crossfade,
}

impl<A, B, E> PwmPair<A, B>
where
    A: SetDutyCycle<Error = E>,
    B: SetDutyCycle<Error = E>,
{
    pub fn new(a: A, b: B) -> Self {
        Self {
            a,
            b,
            fade: Crossfade::new(),
        }
    }

    /// Apply the next step of the fade, returns the duty cycles set
    pub fn step(&mut self) -> Result<(u8, u8), E> {
        // The sequence never ends
        let (a, b) = self.fade.next().unwrap_or_default();
        self.a.set_duty_cycle_percent(a)?;
        self.b.set_duty_cycle_percent(b)?;
        Ok((a, b))
    }

    pub fn release(self) -> (A, B) {
        (self.a, self.b)
    }
}
