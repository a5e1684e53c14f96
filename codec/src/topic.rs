// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Lesser General Public License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    EmptyTopic,
    TooManyData,
    InvalidChar,
    ContainsWildChar,
}

impl From<TopicError> for DecodeError {
    fn from(_e: TopicError) -> Self {
        Self::InvalidTopic
    }
}

impl From<TopicError> for EncodeError {
    fn from(_e: TopicError) -> Self {
        Self::InvalidTopic
    }
}

/// Validate a topic filter.
///
/// Rules are defined in `MQTT chapter-4.7 Topic Names and Topic Filters`:
/// - `#` matches any number of trailing levels and must be the last level.
/// - `+` matches exactly one level and must occupy a whole level.
///
/// ```
/// use tern_codec::topic::validate_sub_topic;
/// assert!(validate_sub_topic("sport/tennis/player/#").is_ok());
/// assert!(validate_sub_topic("sport/tennis/player#").is_err());
/// assert!(validate_sub_topic("#").is_ok());
/// assert!(validate_sub_topic("sport/#/player/ranking").is_err());
/// assert!(validate_sub_topic("+").is_ok());
/// assert!(validate_sub_topic("sport+").is_err());
/// ```
///
/// # Errors
///
/// Returns error if `topic` violates the rules above.
pub fn validate_sub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if topic.len() > u16::MAX as usize {
        return Err(TopicError::TooManyData);
    }

    let mut levels = topic.split('/').peekable();
    while let Some(level) = levels.next() {
        let is_last = levels.peek().is_none();
        match level {
            "#" => {
                if !is_last {
                    return Err(TopicError::InvalidChar);
                }
            }
            "+" => (),
            _ => {
                if level.contains(|c| c == '#' || c == '+') {
                    return Err(TopicError::InvalidChar);
                }
            }
        }
    }
    Ok(())
}

/// Check that a topic name contains no wildcard characters.
///
/// ```
/// use tern_codec::topic::validate_pub_topic;
/// assert!(validate_pub_topic("sport/tennis/player/#").is_err());
/// assert!(validate_pub_topic("sport/tennis/player/ranking").is_ok());
/// ```
///
/// # Errors
///
/// Returns error if `topic` is empty, too long or contains wildcards.
pub fn validate_pub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if topic.len() > u16::MAX as usize {
        return Err(TopicError::TooManyData);
    }

    if topic.contains(|c| c == '#' || c == '+') {
        Err(TopicError::ContainsWildChar)
    } else {
        Ok(())
    }
}

/// Topic name used in publish packets. Contains no wildcard characters.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubTopic(String);

impl PubTopic {
    /// Create a new topic name.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty or contains wildcard characters.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        validate_pub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Get byte length used in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        validate_pub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

/// Topic filter used in subscribe packets. May contain wildcard characters.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubTopic(String);

impl SubTopic {
    /// Create a new topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` violates the wildcard rules.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        validate_sub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Get byte length used in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        validate_sub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

/// One level of a parsed topic filter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum FilterLevel {
    /// Literal level, compared byte for byte.
    Literal(String),

    /// `+`, matches exactly one level.
    SingleWildcard,

    /// `#`, matches any number of trailing levels including the parent.
    MultiWildcard,
}

impl FilterLevel {
    fn parse(s: &str) -> Self {
        match s {
            "+" => Self::SingleWildcard,
            "#" => Self::MultiWildcard,
            _ => Self::Literal(s.to_string()),
        }
    }
}

/// A parsed topic filter used to match topic names of incoming publish messages.
///
/// `sport/tennis/#` matches `sport/tennis` and every topic below it;
/// `+` matches exactly one level. Topic names starting with `$` only match
/// filters whose first level also starts with `$` [MQTT-4.7.2-1].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicFilter {
    filter: String,
    levels: Vec<FilterLevel>,
}

impl TopicFilter {
    /// Parse a topic filter string.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` violates the wildcard rules.
    pub fn parse(filter: &str) -> Result<Self, TopicError> {
        validate_sub_topic(filter)?;
        let levels = filter.split('/').map(FilterLevel::parse).collect();
        Ok(Self {
            filter: filter.to_string(),
            levels,
        })
    }

    /// Get the filter string this object was parsed from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.filter
    }

    /// Check whether `topic_name` is matched by this filter.
    ///
    /// `topic_name` is expected to contain no wildcard characters.
    #[must_use]
    pub fn is_match(&self, topic_name: &str) -> bool {
        // Topics starting with `$` are not matched by filters starting
        // with a wildcard [MQTT-4.7.2-1].
        if topic_name.starts_with('$') {
            match self.levels.first() {
                Some(FilterLevel::Literal(level)) if level.starts_with('$') => (),
                _ => return false,
            }
        }

        let name_levels: Vec<&str> = topic_name.split('/').collect();
        let matches_n_levels = |n: usize| -> bool {
            for i in 0..n {
                match &self.levels[i] {
                    FilterLevel::MultiWildcard => return true,
                    FilterLevel::SingleWildcard => (),
                    FilterLevel::Literal(level) => {
                        if level != name_levels[i] {
                            return false;
                        }
                    }
                }
            }
            true
        };

        if name_levels.len() < self.levels.len() {
            // A name with fewer levels only matches when the filter has exactly
            // one extra level and it is `#`, which covers the parent level.
            if name_levels.len() != self.levels.len() - 1 {
                return false;
            }
            if self.levels.last() != Some(&FilterLevel::MultiWildcard) {
                return false;
            }
            matches_n_levels(name_levels.len())
        } else if name_levels.len() > self.levels.len() {
            if self.levels.last() == Some(&FilterLevel::MultiWildcard) {
                matches_n_levels(self.levels.len() - 1)
            } else {
                false
            }
        } else {
            matches_n_levels(self.levels.len())
        }
    }
}

impl FromStr for TopicFilter {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sub_topic() {
        assert!(validate_sub_topic("#").is_ok());
        assert!(validate_sub_topic("+").is_ok());
        assert!(validate_sub_topic("+/tennis/#").is_ok());
        assert!(validate_sub_topic("sport/+/player1").is_ok());
        assert!(validate_sub_topic("/").is_ok());

        assert!(validate_sub_topic("").is_err());
        assert!(validate_sub_topic("sport/tennis#").is_err());
        assert!(validate_sub_topic("sport/#/ranking").is_err());
        assert!(validate_sub_topic("sport+").is_err());
        assert!(validate_sub_topic("+sport").is_err());
    }

    #[test]
    fn test_validate_pub_topic() {
        assert!(validate_pub_topic("sport/tennis").is_ok());
        assert!(validate_pub_topic("/").is_ok());
        assert!(validate_pub_topic("").is_err());
        assert!(validate_pub_topic("sport/#").is_err());
        assert!(validate_pub_topic("sport/+").is_err());
    }

    #[test]
    fn test_multi_wildcard_matches_all() {
        let filter = TopicFilter::parse("#").unwrap();
        assert!(filter.is_match("/"));
        assert!(filter.is_match("sport"));
        assert!(filter.is_match("/sport"));
        assert!(filter.is_match("sport/player1/score"));

        assert!(!filter.is_match("$SYS"));
        assert!(!filter.is_match("$SYS/x"));
        assert!(!filter.is_match("$sport/player1/score"));
    }

    #[test]
    fn test_multi_wildcard_matches_dollar_prefix() {
        let filter = TopicFilter::parse("$SYS/#").unwrap();
        assert!(filter.is_match("$SYS"));
        assert!(filter.is_match("$SYS/"));
        assert!(filter.is_match("$SYS/x"));
        assert!(filter.is_match("$SYS/sport/player1"));

        assert!(!filter.is_match("$other"));
        assert!(!filter.is_match("$sport/player1/score"));
    }

    #[test]
    fn test_multi_wildcard_matches_parent() {
        let filter = TopicFilter::parse("sport/player1/#").unwrap();
        assert!(filter.is_match("sport/player1"));
        assert!(filter.is_match("sport/player1/score"));
        assert!(filter.is_match("sport/player1/score/high"));

        assert!(!filter.is_match("sport/player2"));
        assert!(!filter.is_match("sport/player2/score"));
        assert!(!filter.is_match("/sport/player1"));
    }

    #[test]
    fn test_single_wildcard() {
        let filter = TopicFilter::parse("+").unwrap();
        assert!(filter.is_match("hello"));
        assert!(!filter.is_match("/hello"));
        assert!(!filter.is_match("/"));

        let filter = TopicFilter::parse("+/+").unwrap();
        assert!(filter.is_match("/"));
        assert!(filter.is_match("/hello"));
        assert!(!filter.is_match("hello"));

        let filter = TopicFilter::parse("sport/+/player1").unwrap();
        assert!(filter.is_match("sport/tennis/player1"));
        assert!(!filter.is_match("sport/tennis/player2"));
        assert!(!filter.is_match("sport/player1"));
    }

    #[test]
    fn test_literal_filter() {
        let filter = TopicFilter::parse("sport/tennis").unwrap();
        assert!(filter.is_match("sport/tennis"));
        assert!(!filter.is_match("sport"));
        assert!(!filter.is_match("sport/tennis/player1"));
    }
}
