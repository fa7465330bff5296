use std::collections::HashMap;

use crate::message::ExchangeType;

/// A named routing rule set. Only the broker worker ever mutates one.
#[derive(Debug, Clone)]
pub struct Exchange {
    name: String,
    kind: ExchangeType,
    bindings: HashMap<String, Vec<String>>,
}

impl Exchange {
    pub fn new(name: impl Into<String>, kind: ExchangeType) -> Self {
        Self {
            name: name.into(),
            kind,
            bindings: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ExchangeType {
        self.kind
    }

    /// Binds `queue_name` to `routing_keys`. Binding a queue again appends
    /// the new keys to the ones it already has.
    pub fn bind<S: AsRef<str>>(&mut self, queue_name: &str, routing_keys: &[S]) {
        self.bindings
            .entry(queue_name.to_string())
            .or_default()
            .extend(routing_keys.iter().map(|k| k.as_ref().to_string()));
    }

    pub fn bindings(&self, queue_name: &str) -> Option<&[String]> {
        self.bindings.get(queue_name).map(Vec::as_slice)
    }

    /// Resolves the deliveries a publish with `routing_key` produces, as
    /// `(queue name, delivered routing key)` pairs.
    ///
    /// A topic queue appears once per matching pattern, so overlapping
    /// patterns yield duplicate deliveries.
    pub fn route(&self, routing_key: &str) -> Vec<(&str, String)> {
        let mut targets = Vec::new();

        for (queue_name, patterns) in &self.bindings {
            match self.kind {
                ExchangeType::Direct => {
                    if patterns.iter().any(|p| p == routing_key) {
                        targets.push((queue_name.as_str(), routing_key.to_string()));
                    }
                }
                ExchangeType::Topic => {
                    for pattern in patterns {
                        if TopicPattern::compile(pattern).matches(routing_key) {
                            targets.push((queue_name.as_str(), routing_key.to_string()));
                        }
                    }
                }
                ExchangeType::Fanout => targets.push((queue_name.as_str(), String::new())),
            }
        }

        targets
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    /// One or more characters, newline excluded.
    Wildcard,
}

/// A compiled topic binding pattern.
///
/// The pattern is split on `.`; a segment that is exactly `*` matches one or
/// more characters, everything else is literal. Matching is anchored at the
/// start of the routing key only, so `ball.*` also accepts `ball.red.extra`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    tokens: Vec<Token>,
}

impl TopicPattern {
    pub fn compile(pattern: &str) -> Self {
        let mut tokens = Vec::new();

        for (i, segment) in pattern.split('.').enumerate() {
            if i > 0 {
                push_literal(&mut tokens, ".");
            }
            if segment == "*" {
                tokens.push(Token::Wildcard);
            } else if !segment.is_empty() {
                push_literal(&mut tokens, segment);
            }
        }

        Self { tokens }
    }

    pub fn matches(&self, routing_key: &str) -> bool {
        match_prefix(&self.tokens, routing_key)
    }
}

fn push_literal(tokens: &mut Vec<Token>, text: &str) {
    if let Some(Token::Literal(last)) = tokens.last_mut() {
        last.push_str(text);
    } else {
        tokens.push(Token::Literal(text.to_string()));
    }
}

/// Tracks every byte offset of `key` the tokens seen so far can end at, one
/// token at a time, so a match costs O(tokens * len) whatever the wildcards.
fn match_prefix(tokens: &[Token], key: &str) -> bool {
    let mut reachable = vec![false; key.len() + 1];
    reachable[0] = true;

    for token in tokens {
        let mut next = vec![false; key.len() + 1];

        match token {
            Token::Literal(literal) => {
                // Reachable offsets always sit on char boundaries.
                for start in 0..=key.len() {
                    if reachable[start] && key[start..].starts_with(literal.as_str()) {
                        next[start + literal.len()] = true;
                    }
                }
            }
            Token::Wildcard => {
                let mut open = false;
                for (idx, ch) in key.char_indices() {
                    open |= reachable[idx];
                    if ch == '\n' {
                        open = false;
                    } else if open {
                        next[idx + ch.len_utf8()] = true;
                    }
                }
            }
        }

        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }

    true
}
