//! Start and exit schedules for virtual users.
//!
//! Both functions are pure. `index` is the user's 0-based position within its
//! scenario and `users` is that scenario's user count.

use std::time::Duration;

use super::LoadProfile;

/// Spacing between users of the same wave group.
const WAVE_SPACING: Duration = Duration::from_millis(100);
const STEP_GROUPS: usize = 5;
const WAVE_GROUPS: usize = 4;

/// How long after the run starts user `index` begins its first iteration.
pub fn start_delay(profile: LoadProfile, index: usize, users: usize, ramp_up: Duration) -> Duration {
    if users == 0 {
        return Duration::ZERO;
    }
    match profile {
        LoadProfile::Constant | LoadProfile::RampUp => fraction(ramp_up, index, users),
        LoadProfile::RampDown => Duration::ZERO,
        LoadProfile::Spike => ramp_up,
        LoadProfile::Step => {
            let group = index * STEP_GROUPS / users;
            fraction(ramp_up, group, STEP_GROUPS)
        }
        LoadProfile::Wave => {
            let group = index * WAVE_GROUPS / users;
            // first index that lands in `group`
            let first = (group * users).div_ceil(WAVE_GROUPS);
            let phase = u32::try_from(index - first).unwrap_or(u32::MAX);
            fraction(ramp_up, group, WAVE_GROUPS).saturating_add(WAVE_SPACING.saturating_mul(phase))
        }
    }
}

/// How long before the end of the run user `index` stops starting new
/// iterations. Only `RampDown` staggers exits; a user always gets at least
/// one iteration.
pub fn exit_offset(profile: LoadProfile, index: usize, users: usize, duration: Duration) -> Duration {
    match profile {
        LoadProfile::RampDown if users > 0 => fraction(duration, index, users),
        _ => Duration::ZERO,
    }
}

/// `value * num / den` without losing sub-unit precision.
fn fraction(value: Duration, num: usize, den: usize) -> Duration {
    let nanos = value.as_nanos() * num as u128 / den as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn delays(profile: LoadProfile, users: usize, ramp_up: Duration) -> Vec<Duration> {
        (0..users)
            .map(|i| start_delay(profile, i, users, ramp_up))
            .collect()
    }

    #[test]
    fn constant_spreads_evenly() {
        assert_eq!(
            delays(LoadProfile::Constant, 4, secs(4)),
            [secs(0), secs(1), secs(2), secs(3)]
        );
        assert_eq!(
            delays(LoadProfile::RampUp, 4, secs(4)),
            delays(LoadProfile::Constant, 4, secs(4))
        );
    }

    #[test]
    fn spike_and_ramp_down() {
        assert!(delays(LoadProfile::Spike, 3, secs(5)).iter().all(|d| *d == secs(5)));
        assert!(delays(LoadProfile::RampDown, 3, secs(5)).iter().all(|d| d.is_zero()));
    }

    #[test]
    fn step_uses_five_groups() {
        let d = delays(LoadProfile::Step, 10, secs(10));
        assert_eq!(
            d,
            [
                secs(0),
                secs(0),
                secs(2),
                secs(2),
                secs(4),
                secs(4),
                secs(6),
                secs(6),
                secs(8),
                secs(8)
            ]
        );
    }

    #[test]
    fn wave_groups_with_phase_offsets() {
        let ms = Duration::from_millis;
        let d = delays(LoadProfile::Wave, 8, secs(4));
        assert_eq!(
            d,
            [
                ms(0),
                ms(100),
                ms(1000),
                ms(1100),
                ms(2000),
                ms(2100),
                ms(3000),
                ms(3100)
            ]
        );

        // Uneven split: 5 users over 4 groups.
        let d = delays(LoadProfile::Wave, 5, secs(4));
        assert_eq!(d, [ms(0), ms(100), ms(1000), ms(2000), ms(3000)]);
    }

    #[test]
    fn huge_ramp_up_saturates() {
        let d = delays(LoadProfile::Wave, 8, Duration::MAX);
        assert!(d.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(d[7], Duration::from_nanos(u64::MAX).saturating_add(Duration::from_millis(100)));
    }

    #[test]
    fn ramp_down_staggers_exits() {
        let offsets: Vec<_> = (0..4)
            .map(|i| exit_offset(LoadProfile::RampDown, i, 4, secs(8)))
            .collect();
        assert_eq!(offsets, [secs(0), secs(2), secs(4), secs(6)]);
        assert!(exit_offset(LoadProfile::Constant, 3, 4, secs(8)).is_zero());
    }
}
