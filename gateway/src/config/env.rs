//! Environment variable readers.
//!
//! Missing and empty variables are `None`; present but unparsable values are
//! errors naming the variable.

use std::env;
use std::str::FromStr;

use super::utils::{non_empty, parse_bool};

pub fn env_string(name: &str) -> Option<String> {
    non_empty(env::var(name).ok())
}

pub fn env_parse<T>(name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: {e}")),
        None => Ok(None),
    }
}

pub fn env_bool(name: &str) -> Result<Option<bool>, String> {
    match env_string(name) {
        Some(raw) => parse_bool(&raw)
            .map(Some)
            .ok_or_else(|| format!("Invalid boolean for {name}: {raw}")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_env_parse() {
        unsafe {
            env::set_var("VOICE_BRIDGE_TEST_NUM", "42");
            env::set_var("VOICE_BRIDGE_TEST_BAD", "forty");
        }
        assert_eq!(env_parse::<u32>("VOICE_BRIDGE_TEST_NUM"), Ok(Some(42)));
        assert!(
            env_parse::<u32>("VOICE_BRIDGE_TEST_BAD")
                .unwrap_err()
                .contains("VOICE_BRIDGE_TEST_BAD")
        );
        assert_eq!(env_parse::<u32>("VOICE_BRIDGE_TEST_MISSING"), Ok(None));
        unsafe {
            env::remove_var("VOICE_BRIDGE_TEST_NUM");
            env::remove_var("VOICE_BRIDGE_TEST_BAD");
        }
    }

    #[test]
    #[serial]
    fn test_env_bool() {
        unsafe {
            env::set_var("VOICE_BRIDGE_TEST_FLAG", "yes");
        }
        assert_eq!(env_bool("VOICE_BRIDGE_TEST_FLAG"), Ok(Some(true)));
        unsafe {
            env::set_var("VOICE_BRIDGE_TEST_FLAG", "sometimes");
        }
        assert!(env_bool("VOICE_BRIDGE_TEST_FLAG").is_err());
        unsafe {
            env::remove_var("VOICE_BRIDGE_TEST_FLAG");
        }
    }
}
