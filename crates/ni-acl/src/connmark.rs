//! Connmark bit layout (spec §4.E "Mangle / PREROUTING"):
//!
//! ```text
//! [ AppID : 8 bits | AppFlag : 1 | DropFlag : 1 | UserFlag : 1 | AceID : 21 bits ]
//! ```
//!
//! The layout is a contract with downstream flow collectors (spec §6
//! "Connmark layout"); changing bit widths here is a wire-format break.

const ACE_ID_BITS: u32 = 21;
const USER_FLAG_BIT: u32 = ACE_ID_BITS;
const DROP_FLAG_BIT: u32 = ACE_ID_BITS + 1;
const APP_FLAG_BIT: u32 = ACE_ID_BITS + 2;
const APP_ID_SHIFT: u32 = ACE_ID_BITS + 3;

const ACE_ID_MASK: u32 = (1 << ACE_ID_BITS) - 1;

/// Reserved AceID for essential-protocol allow rules and the final
/// default-drop rule (spec §9 "Open questions"): `0x1fffff`, the maximum
/// 21-bit value. Treated as reserved; never assignable to a user rule.
pub const DEFAULT_DROP_ACE_ID: u32 = ACE_ID_MASK;

/// Reserved AceIDs for essential-protocol allowances, one per protocol
/// (spec §4.E item 1), taken from the low end of the AceID space so they
/// can never collide with [`DEFAULT_DROP_ACE_ID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EssentialAceId {
    Dhcp,
    Dns,
    Icmpv6,
    MetadataServer,
}

impl EssentialAceId {
    pub fn ace_id(self) -> u32 {
        match self {
            EssentialAceId::Dhcp => 1,
            EssentialAceId::Dns => 2,
            EssentialAceId::Icmpv6 => 3,
            EssentialAceId::MetadataServer => 4,
        }
    }
}

/// A fully assembled connmark value for one allowed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnMark {
    pub app_id: u8,
    pub is_app_rule: bool,
    pub is_drop: bool,
    pub is_user_rule: bool,
    pub ace_id: u32,
}

impl ConnMark {
    /// Build the mark for an essential-protocol allowance: no app/user
    /// flag, not a drop.
    pub fn essential(ace_id: EssentialAceId) -> Self {
        Self {
            app_id: 0,
            is_app_rule: false,
            is_drop: false,
            is_user_rule: false,
            ace_id: ace_id.ace_id(),
        }
    }

    /// Build the mark for a user ACL rule's admitted connection.
    pub fn user_rule(app_id: u8, ace_id: u32, is_drop: bool) -> Self {
        Self {
            app_id,
            is_app_rule: true,
            is_drop,
            is_user_rule: true,
            ace_id,
        }
    }

    /// Build the mark for the final default-drop-all rule (spec §4.E
    /// "A default drop-all mark is appended at the end for Local NIs").
    pub fn default_drop(app_id: u8) -> Self {
        Self {
            app_id,
            is_app_rule: true,
            is_drop: true,
            is_user_rule: false,
            ace_id: DEFAULT_DROP_ACE_ID,
        }
    }

    /// Encode into the 32-bit value iptables/netfilter marks the
    /// connection with.
    pub fn encode(self) -> u32 {
        debug_assert!(self.ace_id & !ACE_ID_MASK == 0, "AceID must fit in 21 bits");
        (u32::from(self.app_id) << APP_ID_SHIFT)
            | (u32::from(self.is_app_rule) << APP_FLAG_BIT)
            | (u32::from(self.is_drop) << DROP_FLAG_BIT)
            | (u32::from(self.is_user_rule) << USER_FLAG_BIT)
            | (self.ace_id & ACE_ID_MASK)
    }

    pub fn decode(mark: u32) -> Self {
        Self {
            app_id: (mark >> APP_ID_SHIFT) as u8,
            is_app_rule: (mark >> APP_FLAG_BIT) & 1 == 1,
            is_drop: (mark >> DROP_FLAG_BIT) & 1 == 1,
            is_user_rule: (mark >> USER_FLAG_BIT) & 1 == 1,
            ace_id: mark & ACE_ID_MASK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let mark = ConnMark::user_rule(7, 42, false);
        assert_eq!(ConnMark::decode(mark.encode()), mark);
    }

    #[test]
    fn spec_scenario_4_mark_matches_expected_bit_pattern() {
        // appID<<24 | 1<<23 | 1<<21 | aceID, with appID=1, aceID=the rule's id.
        let mark = ConnMark::user_rule(1, 7, false);
        let expected = (1u32 << 24) | (1 << 23) | (1 << 21) | 7;
        assert_eq!(mark.encode(), expected);
    }

    #[test]
    fn default_drop_ace_id_is_reserved_maximum() {
        assert_eq!(DEFAULT_DROP_ACE_ID, 0x1f_ffff);
        let mark = ConnMark::default_drop(3);
        assert!(ConnMark::decode(mark.encode()).is_drop);
    }

    #[test]
    fn essential_marks_carry_no_app_or_user_flag() {
        let mark = ConnMark::essential(EssentialAceId::Dns);
        assert!(!mark.is_app_rule);
        assert!(!mark.is_user_rule);
        assert!(!mark.is_drop);
    }
}
