/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use crate::config::{RetryConfig, RetryMode};
use rand::Rng;
use std::time::Duration;

/// Decides whether, and after how long, a rejected write is dispatched again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryPolicy {
    /// Fixed backoff, no limit on attempts. Keeps pressure on the store for as
    /// long as it keeps rejecting.
    Unbounded { backoff: Duration },
    /// Exponential backoff capped at `max_backoff`, at most `max_attempts`
    /// dispatches per item.
    Capped {
        max_attempts: u32,
        base: Duration,
        max_backoff: Duration,
        jitter: bool,
    },
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        match config.effective_mode() {
            RetryMode::Unbounded => Self::Unbounded {
                backoff: config.backoff,
            },
            RetryMode::Capped => Self::Capped {
                max_attempts: config.max_attempts,
                base: config.backoff,
                max_backoff: config.max_backoff,
                jitter: config.jitter,
            },
        }
    }

    /// Delay before the next dispatch, given how many dispatches the item has
    /// already had. `None` means give up.
    pub fn next_delay(&self, attempts: u32) -> Option<Duration> {
        match *self {
            Self::Unbounded { backoff } => Some(backoff),
            Self::Capped {
                max_attempts,
                base,
                max_backoff,
                jitter,
            } => {
                if attempts >= max_attempts {
                    return None;
                }
                let delay = exponential(base, max_backoff, attempts.saturating_sub(1));
                Some(if jitter { equal_jitter(delay) } else { delay })
            }
        }
    }
}

fn exponential(base: Duration, max_backoff: Duration, exponent: u32) -> Duration {
    let factor = 2f64.powi(exponent.min(31) as i32);
    let delay = (base.as_secs_f64() * factor).min(max_backoff.as_secs_f64());
    Duration::from_secs_f64(delay)
}

/// Half of the delay is kept, the other half is randomized.
fn equal_jitter(delay: Duration) -> Duration {
    let half = delay / 2;
    let spread = u64::try_from(half.as_micros()).unwrap_or(u64::MAX);
    if spread == 0 {
        return delay;
    }
    half + Duration::from_micros(rand::rng().random_range(0..=spread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;

    fn capped(max_attempts: u32, jitter: bool) -> RetryPolicy {
        RetryPolicy::Capped {
            max_attempts,
            base: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            jitter,
        }
    }

    #[test]
    fn given_unbounded_policy_should_always_return_fixed_backoff() {
        let policy = RetryPolicy::Unbounded {
            backoff: Duration::from_millis(100),
        };
        for attempts in [1, 10, 10_000, u32::MAX] {
            assert_eq!(
                policy.next_delay(attempts),
                Some(Duration::from_millis(100))
            );
        }
    }

    #[test]
    fn given_capped_policy_should_grow_exponentially_up_to_cap() {
        let policy = capped(10, false);
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(4), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(9), Some(Duration::from_millis(500)));
    }

    #[test]
    fn given_capped_policy_should_give_up_after_max_attempts() {
        let policy = capped(3, false);
        assert!(policy.next_delay(2).is_some());
        assert_eq!(policy.next_delay(3), None);
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn given_jitter_should_stay_within_half_and_full_delay() {
        let policy = capped(10, true);
        for _ in 0..100 {
            let delay = policy.next_delay(2).unwrap();
            assert!(delay >= Duration::from_millis(100), "{delay:?}");
            assert!(delay <= Duration::from_millis(200), "{delay:?}");
        }
    }

    #[test]
    fn given_profiles_should_build_matching_policies() {
        let stress = RetryPolicy::from_config(&RetryConfig::default());
        assert!(matches!(stress, RetryPolicy::Unbounded { .. }));

        let load = RetryPolicy::from_config(&RetryConfig {
            profile: Profile::Load,
            ..RetryConfig::default()
        });
        assert!(matches!(load, RetryPolicy::Capped { max_attempts: 10, .. }));
    }
}
