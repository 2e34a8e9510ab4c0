//! LED blink-count derivation (spec §7 "User-visible behavior").
//!
//! The LED subsystem itself is out of scope, but the derivation rule from
//! usable-address count, controller reachability and radio-silence is
//! part of this contract, so it lives here as a pure function the agent's
//! main loop calls after every probe or DPC-state change.

use nim_shared_types::dpc::DpcState;
use nim_shared_types::events::LedBlinkCount;

/// Derive the blink count the LED collaborator should display.
///
/// `onboarded` reflects whether the device has completed onboarding with
/// the controller (a device certificate has been issued); it is supplied
/// by the agent's CipherContext/ControllerCert subscription, outside this
/// crate's scope.
pub fn derive_blink_count(
    usable_address_count: usize,
    dpc_state: DpcState,
    radio_silence: bool,
    onboarded: bool,
) -> LedBlinkCount {
    if radio_silence {
        return LedBlinkCount::AirplaneMode;
    }
    if usable_address_count == 0 {
        return LedBlinkCount::WaitingForIp;
    }
    match dpc_state {
        DpcState::Success if onboarded => LedBlinkCount::ConnectedOnboarded,
        DpcState::Success => LedBlinkCount::ConnectedNotOnboarded,
        DpcState::Fail | DpcState::FailWithIpAndDns if !onboarded => LedBlinkCount::OnboardingFailure,
        _ => LedBlinkCount::Connecting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radio_silence_wins_over_everything_else() {
        assert_eq!(
            derive_blink_count(3, DpcState::Success, true, true),
            LedBlinkCount::AirplaneMode
        );
    }

    #[test]
    fn no_usable_address_is_waiting_for_ip() {
        assert_eq!(
            derive_blink_count(0, DpcState::None, false, false),
            LedBlinkCount::WaitingForIp
        );
    }

    #[test]
    fn success_and_onboarded_is_fully_connected() {
        assert_eq!(
            derive_blink_count(1, DpcState::Success, false, true),
            LedBlinkCount::ConnectedOnboarded
        );
    }

    #[test]
    fn success_without_onboarding_is_connected_not_onboarded() {
        assert_eq!(
            derive_blink_count(1, DpcState::Success, false, false),
            LedBlinkCount::ConnectedNotOnboarded
        );
    }

    #[test]
    fn repeated_failure_before_onboarding_is_onboarding_failure() {
        assert_eq!(
            derive_blink_count(1, DpcState::Fail, false, false),
            LedBlinkCount::OnboardingFailure
        );
    }
}
