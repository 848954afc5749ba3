use std::fmt;

/// Which log a message belongs to.
///
/// Everything currently goes to the shared `chatroom` log. Direct messages map
/// a pair of participants to one key regardless of who sends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicKey {
    Chatroom,
    Direct { low: String, high: String },
}

impl TopicKey {
    pub fn direct(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        TopicKey::Direct {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn stream_key(&self) -> String {
        match self {
            TopicKey::Chatroom => "chatroom".to_string(),
            TopicKey::Direct { low, high } => format!("{low}:{high}"),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stream_key())
    }
}
