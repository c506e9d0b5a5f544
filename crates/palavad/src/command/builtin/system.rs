//! `palava.system.*`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::call::{Call, Content};
use crate::command::{Command, CommandError, Job, JobError, Response};
use crate::context::ServerContext;
use crate::scope::Scope;
use crate::session::Session;

/// Replies with the bridge version.
#[derive(Debug, Clone, Copy, Default)]
pub struct Version;

impl Command for Version {
    fn execute(&self, _call: &Call, _scope: &Scope) -> Result<Content, CommandError> {
        Ok(Content::text(env!("CARGO_PKG_VERSION")))
    }
}

/// Blocks the worker for `msec` milliseconds, or for a random duration below
/// `random` milliseconds when `msec` is absent or zero. Unparsable values
/// count as zero; negative values never sleep.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sleep;

impl Sleep {
    fn delay(call: &Call) -> Duration {
        let argument = |key: &str| {
            call.string_argument(key)
                .and_then(|value| value.trim().parse::<i64>().ok())
                .unwrap_or(0)
        };
        let millis = match argument("msec") {
            0 => match argument("random") {
                bound if bound > 0 => rand::thread_rng().gen_range(0..bound),
                _ => 0,
            },
            fixed => fixed,
        };
        Duration::from_millis(u64::try_from(millis).unwrap_or(0))
    }
}

impl Job for Sleep {
    fn process(
        &self,
        call: &Call,
        response: &mut Response,
        _session: Option<&Arc<Session>>,
        _server: &ServerContext,
    ) -> Result<(), JobError> {
        let delay = Self::delay(call);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        response.set_content(Content::ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::protocol::{CallType, Header};

    fn sleep_call(payload: &str) -> Call {
        Call::new(
            Header::new(CallType::Json, "palava.system.sleep", "", payload.len()),
            payload.as_bytes().to_vec(),
        )
    }

    #[rstest]
    #[case::fixed(r#"{"msec":"3"}"#, 3)]
    #[case::negative_skips_random(r#"{"msec":"-5","random":"1000"}"#, 0)]
    #[case::negative_random(r#"{"random":"-5"}"#, 0)]
    #[case::unparsable(r#"{"msec":"soon","random":"1"}"#, 0)]
    #[case::nothing("{}", 0)]
    fn delays_follow_the_arguments(#[case] payload: &str, #[case] millis: u64) {
        assert_eq!(Sleep::delay(&sleep_call(payload)), Duration::from_millis(millis));
    }

    #[test]
    fn random_delays_stay_below_the_bound() {
        let call = sleep_call(r#"{"msec":"0","random":"5"}"#);
        for _ in 0..20 {
            assert!(Sleep::delay(&call) < Duration::from_millis(5));
        }
    }
}
