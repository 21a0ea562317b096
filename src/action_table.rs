//! Action Table Loader: parses the engine-action catalogue out of a
//! companion `nwscript.nss`-shaped source text, indexed by the explicit
//! numeric index in each entry's header comment — not by position, since
//! indices may skip and unrelated declarations may intervene between
//! entries.
//!
//! Each grammar fragment is a small function over a `nom` combinator chain
//! rather than a hand-rolled character scan.

use crate::error::LinkError;
use crate::types::Type;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, space0, space1},
    combinator::{map, opt, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One entry in the action table.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionEntry {
    pub name: String,
    pub return_type: Type,
    pub param_types: Vec<Type>,
    /// `None` for a required parameter; `Some(literal text)` for a
    /// parameter with a default value.
    pub default_literals: Vec<Option<String>>,
}

impl ActionEntry {
    /// The count before the first trailing default:
    /// `max { i+1 | defaults[i] is unset }`.
    pub fn required_param_count(&self) -> usize {
        self.default_literals
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_none())
            .map(|(i, _)| i + 1)
            .max()
            .unwrap_or(0)
    }

    /// Total stack slots consumed by a call passing every declared
    /// parameter.
    pub fn param_size(&self) -> usize {
        self.param_types.iter().map(Type::slot_width).sum()
    }

    /// Debug-dump form: `"<name>" <ret-code> <paramSize>`.
    pub fn dump(&self) -> String {
        format!(
            "\"{}\" {} {}",
            self.name,
            type_code(&self.return_type),
            self.param_size()
        )
    }
}

fn type_code(t: &Type) -> char {
    match t {
        Type::Void => '-',
        Type::Int => 'i',
        Type::Float => 'f',
        Type::String => 's',
        Type::Object => 'o',
        Type::Vector => 'v',
        Type::Effect => 'e',
        Type::Location => 'l',
        Type::Talent => 't',
        Type::Action => 'a',
        Type::Event => 'n',
        Type::Struct(_) => '?',
        Type::Any => '?',
    }
}

/// The loaded action catalogue, keyed by engine opcode index.
#[derive(Clone, Debug, Default)]
pub struct ActionTable {
    entries: BTreeMap<u16, ActionEntry>,
}

impl ActionTable {
    /// Look up an action by index. Fails with [LinkError::ActionTableMissing]
    /// if the index was never claimed or never resolved to a signature.
    pub fn action(&self, index: u16) -> Result<&ActionEntry, LinkError> {
        self.entries
            .get(&index)
            .ok_or(LinkError::ActionTableMissing(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a companion action-table source text, starting collection at the
/// first `// 0.` header.
pub fn load(source: &str) -> ActionTable {
    let mut entries = BTreeMap::new();
    let mut started = false;
    let mut pending_index: Option<u16> = None;

    for line in source.lines() {
        if let Some(index) = parse_header(line) {
            if index == 0 {
                started = true;
            }
            if started {
                if let Some(stale) = pending_index.take() {
                    warn!(index = stale, "action header had no following signature");
                }
                pending_index = Some(index);
            }
            continue;
        }
        if !started {
            continue;
        }
        if let Some(index) = pending_index {
            if let Some(entry) = parse_signature(line) {
                debug!(index, name = %entry.name, "parsed action entry");
                entries.insert(index, entry);
                pending_index = None;
            }
            // A non-matching line between a header and its signature (e.g.
            // a blank divider comment) is skipped, not an error.
        }
    }
    if let Some(stale) = pending_index {
        warn!(index = stale, "action header had no following signature");
    }

    ActionTable { entries }
}

/// `// <index>.` header line, e.g. `// 42.`. Leading/trailing whitespace is
/// tolerated.
fn parse_header(line: &str) -> Option<u16> {
    let (_, index) = header(line).ok()?;
    Some(index)
}

fn header(input: &str) -> IResult<&str, u16> {
    map(
        delimited(
            pair(space0, tag("//")),
            preceded(space0, digit1),
            pair(char('.'), nom::combinator::rest),
        ),
        |digits: &str| digits.parse().unwrap_or(0),
    )(input)
}

/// `<ret-type> <name>(<params>);`, e.g.
/// `int ActionMoveToLocation(location lDestination, int bRun=FALSE);`
fn parse_signature(line: &str) -> Option<ActionEntry> {
    let (_, entry) = signature(line).ok()?;
    Some(entry)
}

fn signature(input: &str) -> IResult<&str, ActionEntry> {
    let (input, _) = space0(input)?;
    let (input, return_type) = type_name(input)?;
    let (input, _) = space1(input)?;
    let (input, name) = identifier(input)?;
    let (input, _) = space0(input)?;
    let (input, params) = delimited(
        char('('),
        separated_list0(tuple((space0, char(','), space0)), parameter),
        char(')'),
    )(input)?;
    let (input, _) = space0(input)?;
    let (input, _) = char(';')(input)?;

    let (param_types, default_literals) = params.into_iter().unzip();
    Ok((
        input,
        ActionEntry {
            name: name.to_owned(),
            return_type,
            param_types,
            default_literals,
        },
    ))
}

fn parameter(input: &str) -> IResult<&str, (Type, Option<String>)> {
    let (input, ty) = type_name(input)?;
    let (input, _) = space1(input)?;
    let (input, _name) = identifier(input)?;
    let (input, default) = opt(preceded(
        tuple((space0, char('='), space0)),
        take_while1(|c: char| c != ',' && c != ')'),
    ))(input)?;
    Ok((input, (ty, default.map(|s| s.trim_end().to_owned()))))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

fn type_name(input: &str) -> IResult<&str, Type> {
    alt((
        value(Type::Void, tag("void")),
        value(Type::Int, tag("int")),
        value(Type::Float, tag("float")),
        value(Type::String, tag("string")),
        value(Type::Object, tag("object")),
        value(Type::Vector, tag("vector")),
        value(Type::Effect, tag("effect")),
        value(Type::Event, tag("event")),
        value(Type::Location, tag("location")),
        value(Type::Talent, tag("talent")),
        value(Type::Action, tag("action")),
    ))(input)
}
