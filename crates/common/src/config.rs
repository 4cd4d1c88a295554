use std::str::FromStr;
use std::time::Duration;

/// A millisecond duration parsed from a bare integer environment variable.
#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;
        Ok(EnvMsDuration(Duration::from_millis(ms)))
    }
}

/// A string environment variable that must not be empty.
#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_ms_duration() {
        let d: EnvMsDuration = "1500".parse().unwrap();
        assert_eq!(d.0, Duration::from_millis(1500));
    }

    #[test]
    fn rejects_non_numeric_ms_duration() {
        assert!("not-a-number".parse::<EnvMsDuration>().is_err());
    }

    #[test]
    fn rejects_empty_string() {
        assert!("".parse::<NonEmptyString>().is_err());
    }

    #[test]
    fn accepts_non_empty_string() {
        let s: NonEmptyString = "hello".parse().unwrap();
        assert_eq!(s.as_str(), "hello");
    }
}
