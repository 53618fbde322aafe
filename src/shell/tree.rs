//! Arena-backed command tree.
//!
//! Each mode has a root node; children are keywords or typed parameters.
//! Matching walks one input word at a time: an exact keyword wins, then a
//! unique keyword prefix, then the first parameter that accepts the word.

use super::Cmd;
use crate::error::ShellError;
use crate::message::{VlanId, MAX_VLAN};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    Word,
    Number { min: u64, max: u64 },
    Ipv4,
    /// Interface name, possibly split in two words (`gig 0/1`).
    Interface,
    /// Comma list of VLAN ids and ranges (`10,20-30`).
    VlanList,
    /// Rest of the line, verbatim.
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Keyword(&'static str),
    Param { name: &'static str, kind: Param },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Word(String),
    Number(u64),
    Ipv4(Ipv4Addr),
    Interface(String),
    VlanList(BTreeSet<VlanId>),
    Line(String),
}

#[derive(Debug, Clone)]
pub struct CommandNode {
    pub token: Token,
    pub help: &'static str,
    pub parent: Option<CommandId>,
    pub children: Vec<CommandId>,
    pub action: Option<Cmd>,
    /// Whether `no <this command>` is accepted.
    pub negatable: bool,
}

/// A fully matched line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    pub cmd: Cmd,
    pub args: Vec<Arg>,
    /// Keywords along the matched path, in order.
    pub keywords: Vec<&'static str>,
}

#[derive(Debug, Default)]
pub struct CommandTree {
    nodes: Vec<CommandNode>,
}

pub fn parse_vlan_list(text: &str) -> Option<BTreeSet<VlanId>> {
    let mut set = BTreeSet::new();
    for part in text.split(',') {
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => (lo.trim().parse::<VlanId>().ok()?, hi.trim().parse::<VlanId>().ok()?),
            None => {
                let v = part.trim().parse::<VlanId>().ok()?;
                (v, v)
            }
        };
        if lo == 0 || hi > MAX_VLAN || lo > hi {
            return None;
        }
        set.extend(lo..=hi);
    }
    (!set.is_empty()).then_some(set)
}

fn starts_alpha(word: &str) -> bool {
    word.chars().next().map_or(false, |c| c.is_ascii_alphabetic())
}

fn starts_digit(word: &str) -> bool {
    word.chars().next().map_or(false, |c| c.is_ascii_digit())
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detached root for a mode.
    pub fn root(&mut self) -> CommandId {
        self.push(Token::Keyword(""), "", None)
    }

    fn push(&mut self, token: Token, help: &'static str, parent: Option<CommandId>) -> CommandId {
        let id = CommandId(self.nodes.len());
        self.nodes.push(CommandNode {
            token,
            help,
            parent,
            children: Vec::new(),
            action: None,
            negatable: false,
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    /// Child keyword under `parent`, reusing an existing one.
    pub fn keyword(&mut self, parent: CommandId, word: &'static str, help: &'static str) -> CommandId {
        let existing = self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].token == Token::Keyword(word));
        existing.unwrap_or_else(|| self.push(Token::Keyword(word), help, Some(parent)))
    }

    pub fn param(&mut self, parent: CommandId, name: &'static str, kind: Param, help: &'static str) -> CommandId {
        let existing = self.nodes[parent.0]
            .children
            .iter()
            .copied()
            .find(|c| self.nodes[c.0].token == Token::Param { name, kind });
        existing.unwrap_or_else(|| self.push(Token::Param { name, kind }, help, Some(parent)))
    }

    /// Attach the command run when input ends at `node`.
    pub fn action(&mut self, node: CommandId, cmd: Cmd, negatable: bool) -> CommandId {
        let entry = &mut self.nodes[node.0];
        entry.action = Some(cmd);
        entry.negatable = negatable;
        node
    }

    pub fn node(&self, id: CommandId) -> &CommandNode {
        &self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pick the child of `node` that `words[0]` selects. Returns the child,
    /// the parsed argument if it was a parameter, and how many words it used.
    fn step(&self, node: CommandId, words: &[&str]) -> Result<(CommandId, Option<Arg>, usize), ShellError> {
        let word = words[0];
        let lower = word.to_ascii_lowercase();
        let children = &self.nodes[node.0].children;

        let keywords: Vec<(CommandId, &'static str)> = children
            .iter()
            .filter_map(|c| match self.nodes[c.0].token {
                Token::Keyword(k) => Some((*c, k)),
                Token::Param { .. } => None,
            })
            .collect();
        if let Some((id, _)) = keywords.iter().find(|(_, k)| *k == lower) {
            return Ok((*id, None, 1));
        }
        let prefixed: Vec<_> = keywords.iter().filter(|(_, k)| k.starts_with(&lower)).collect();
        match prefixed.as_slice() {
            [(id, _)] => return Ok((*id, None, 1)),
            [] => {}
            _ => return Err(ShellError::Ambiguous(word.to_string())),
        }

        let mut range_error = None;
        for child in children {
            let Token::Param { kind, .. } = self.nodes[child.0].token else {
                continue;
            };
            match kind {
                Param::Word => return Ok((*child, Some(Arg::Word(word.to_string())), 1)),
                Param::Line => return Ok((*child, Some(Arg::Line(words.join(" "))), words.len())),
                Param::Number { min, max } => {
                    if let Ok(n) = word.parse::<u64>() {
                        if (min..=max).contains(&n) {
                            return Ok((*child, Some(Arg::Number(n)), 1));
                        }
                        range_error = Some(ShellError::OutOfRange { what: "value", min, max });
                    }
                }
                Param::Ipv4 => {
                    if let Ok(ip) = word.parse::<Ipv4Addr>() {
                        return Ok((*child, Some(Arg::Ipv4(ip)), 1));
                    }
                }
                Param::Interface => {
                    if !starts_alpha(word) {
                        continue;
                    }
                    let has_number = word.chars().any(|c| c.is_ascii_digit());
                    if !has_number && words.len() > 1 && starts_digit(words[1]) {
                        let joined = format!("{}{}", word, words[1]);
                        return Ok((*child, Some(Arg::Interface(joined)), 2));
                    }
                    if has_number {
                        return Ok((*child, Some(Arg::Interface(word.to_string())), 1));
                    }
                }
                Param::VlanList => {
                    if let Some(set) = parse_vlan_list(word) {
                        return Ok((*child, Some(Arg::VlanList(set)), 1));
                    }
                }
            }
        }
        Err(range_error.unwrap_or_else(|| ShellError::InvalidInput(word.to_string())))
    }

    /// Match a whole line (already split into words) from `root`.
    pub fn resolve(&self, root: CommandId, words: &[&str]) -> Result<Matched, ShellError> {
        let mut node = root;
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        let mut rest = words;
        while !rest.is_empty() {
            let (next, arg, used) = self.step(node, rest)?;
            if let Token::Keyword(k) = self.nodes[next.0].token {
                keywords.push(k);
            }
            args.extend(arg);
            node = next;
            rest = &rest[used..];
        }
        let cmd = self.nodes[node.0].action.ok_or(ShellError::Incomplete)?;
        Ok(Matched { cmd, args, keywords })
    }

    /// Node reached by consuming every word, if the words all match.
    pub fn walk(&self, root: CommandId, words: &[&str]) -> Option<CommandId> {
        let mut node = root;
        let mut rest = words;
        while !rest.is_empty() {
            let (next, _, used) = self.step(node, rest).ok()?;
            node = next;
            rest = &rest[used..];
        }
        Some(node)
    }

    /// Whether the node a line resolves to accepts `no`.
    pub fn is_negatable(&self, root: CommandId, words: &[&str]) -> bool {
        self.walk(root, words).map_or(false, |node| self.nodes[node.0].negatable)
    }

    /// Completions for the last (possibly empty) word of `words`.
    pub fn complete(&self, root: CommandId, words: &[&str], trailing_space: bool) -> Vec<String> {
        let (done, partial) = if trailing_space || words.is_empty() {
            (words, "")
        } else {
            (&words[..words.len() - 1], words[words.len() - 1])
        };
        let Some(node) = self.walk(root, done) else {
            return Vec::new();
        };
        let partial = partial.to_ascii_lowercase();
        let mut out: Vec<String> = self.nodes[node.0]
            .children
            .iter()
            .filter_map(|c| match self.nodes[c.0].token {
                Token::Keyword(k) if k.starts_with(&partial) => Some(k.to_string()),
                Token::Param { name, .. } if partial.is_empty() => Some(format!("<{}>", name)),
                _ => None,
            })
            .collect();
        if partial.is_empty() && self.nodes[node.0].action.is_some() && node != root {
            out.push("<cr>".to_string());
        }
        out.sort();
        out.dedup();
        out
    }

    /// Keywords and parameters directly under `node`, with help text.
    pub fn help(&self, node: CommandId) -> Vec<(String, &'static str)> {
        self.nodes[node.0]
            .children
            .iter()
            .map(|c| {
                let n = &self.nodes[c.0];
                let label = match n.token {
                    Token::Keyword(k) => k.to_string(),
                    Token::Param { name, .. } => format!("<{}>", name),
                };
                (label, n.help)
            })
            .collect()
    }
}
