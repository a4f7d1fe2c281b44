use serde::{Deserialize, Serialize};

/// DHCP client protocol phase, numbered as reported through the HAL.
#[repr(i32)]
#[derive(Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum FsmState {
    Init = 1,
    Selecting = 2,
    Requesting = 3,
    Bound = 4,
    Renewing = 5,
    Rebinding = 6,
}

impl From<FsmState> for i32 {
    fn from(value: FsmState) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for FsmState {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        let state = match value {
            1 => FsmState::Init,
            2 => FsmState::Selecting,
            3 => FsmState::Requesting,
            4 => FsmState::Bound,
            5 => FsmState::Renewing,
            6 => FsmState::Rebinding,
            _ => return Err(value),
        };
        Ok(state)
    }
}

#[test]
fn fsm_state_domain_test() {
    for value in 1..=6 {
        let state = FsmState::try_from(value).unwrap();
        assert_eq!(i32::from(state), value);
    }
    assert_eq!(FsmState::try_from(0), Err(0));
    assert_eq!(FsmState::try_from(7), Err(7));
}
