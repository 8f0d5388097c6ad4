//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Incoming factory state machine

use std::fmt;

/// State of an [`IncomingConnectionFactory`](crate::IncomingConnectionFactory)
///
/// Declared in lifecycle order so `state >= Holding` means "not accepting".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FactoryState {
    /// Accepting connections and dispatching on them
    Active,
    /// Connections are held, the acceptor is paused
    Holding,
    /// Destroyed, waiting for the acceptor to finish
    Closed,
    /// Acceptor finished
    Finished,
}

impl FactoryState {
    /// Check if moving from `self` to `next` is permitted
    ///
    /// Only `Holding → Active`, `Active → Holding`, `{Holding, Active} → Closed` and
    /// `Closed → Finished` are legal. Anything else is a no-op for the factory.
    pub fn can_transition_to(self, next: FactoryState) -> bool {
        use FactoryState::*;
        matches!(
            (self, next),
            (Holding, Active) | (Active, Holding) | (Holding | Active, Closed) | (Closed, Finished)
        )
    }

    /// Check if the factory still accepts state changes from the application
    pub fn is_open(self) -> bool {
        self < Self::Closed
    }
}

impl fmt::Display for FactoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Holding => write!(f, "holding"),
            Self::Closed => write!(f, "closed"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STATES: [FactoryState; 4] = [
        FactoryState::Active,
        FactoryState::Holding,
        FactoryState::Closed,
        FactoryState::Finished,
    ];

    fn state() -> impl Strategy<Value = FactoryState> {
        prop::sample::select(STATES.to_vec())
    }

    #[test]
    fn test_legal_transitions() {
        use FactoryState::*;
        assert!(Holding.can_transition_to(Active));
        assert!(Active.can_transition_to(Holding));
        assert!(Active.can_transition_to(Closed));
        assert!(Holding.can_transition_to(Closed));
        assert!(Closed.can_transition_to(Finished));

        assert!(!Finished.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Holding));
        assert!(!Active.can_transition_to(Finished));
        assert!(!Holding.can_transition_to(Holding));
    }

    #[test]
    fn test_ordering() {
        assert!(FactoryState::Active < FactoryState::Holding);
        assert!(FactoryState::Holding.is_open());
        assert!(!FactoryState::Closed.is_open());
    }

    proptest! {
        #[test]
        fn prop_transitions_never_reopen(from in state(), to in state()) {
            if from.can_transition_to(to) {
                prop_assert_ne!(from, to);
                if !from.is_open() {
                    prop_assert!(!to.is_open());
                }
                prop_assert!(to != FactoryState::Finished || from == FactoryState::Closed);
            }
        }

        #[test]
        fn prop_walk_ends_finished_only_through_closed(
            steps in prop::collection::vec(state(), 0..32)
        ) {
            let mut current = FactoryState::Holding;
            let mut seen_closed = false;
            for next in steps {
                if current.can_transition_to(next) {
                    current = next;
                    seen_closed |= current == FactoryState::Closed;
                }
            }
            if current == FactoryState::Finished {
                prop_assert!(seen_closed);
            }
        }
    }
}
