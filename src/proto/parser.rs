// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

use crate::{error::ProtocolError, proto::response::quote_value};

use nom::{
    branch::alt,
    bytes::complete::{escaped, is_not, tag, take_while1},
    character::complete::{alphanumeric1, char, multispace0},
    combinator::{map, opt, recognize, verify},
    multi::{many0, many0_count},
    sequence::{delimited, pair, preceded, separated_pair},
    IResult, Parser,
};

use std::collections::HashMap;

/// Parsed SAM command.
///
/// Represents a command that had valid form but isn't necessarily a command
/// the bridge recognizes; dispatch decides that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command verb, uppercased for lookup.
    pub verb: String,

    /// Command action, uppercased for lookup.
    ///
    /// Second token of the line, when one exists and is not a key-value pair.
    pub action: Option<String>,

    /// Parsed key-value pairs. Values are case-preserving and unescaped.
    pub options: HashMap<String, String>,

    /// Payload following the command line.
    ///
    /// Filled by the connection for `SIZE=`-bearing commands, empty otherwise.
    pub payload: Vec<u8>,
}

impl Command {
    /// Attempt to parse one line (without the trailing newline) into a [`Command`].
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let (rest, command) = parse_command(input).map_err(|_| ProtocolError::InvalidSyntax)?;

        if !rest.trim().is_empty() {
            return Err(ProtocolError::InvalidSyntax);
        }

        Ok(command)
    }

    /// Dispatch key of the command: `"VERB ACTION"` when an action exists, `"VERB"` otherwise.
    pub fn dispatch_key(&self) -> String {
        match &self.action {
            Some(action) => format!("{} {action}", self.verb),
            None => self.verb.clone(),
        }
    }

    /// Get an option value.
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|value| value.as_str())
    }

    /// Get a boolean option, `false` when absent.
    pub fn option_bool(&self, key: &str) -> bool {
        self.options
            .get(key)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Serialize the command back into wire form.
    ///
    /// Values containing whitespace or quotes are quoted with backslash escapes.
    pub fn to_line(&self) -> String {
        let mut line = self.verb.clone();

        if let Some(action) = &self.action {
            line.push(' ');
            line.push_str(action);
        }

        let mut keys = self.options.keys().collect::<Vec<_>>();
        keys.sort();

        for key in keys {
            line.push(' ');
            line.push_str(key);
            line.push('=');
            line.push_str(&quote_value(&self.options[key]));
        }

        line.push('\n');
        line
    }
}

fn parse_command(input: &str) -> IResult<&str, Command> {
    let (rest, verb) = preceded(multispace0, parse_bare_token)(input)?;
    let (rest, action) = opt(preceded(multispace0, parse_action))(rest)?;
    let (rest, options) = parse_key_value_pairs(rest)?;
    let (rest, _) = multispace0(rest)?;

    Ok((
        rest,
        Command {
            verb: verb.to_uppercase(),
            action: action.map(|action| action.to_uppercase()),
            options,
            payload: Vec::new(),
        },
    ))
}

/// A token that is not a key-value pair.
fn parse_bare_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != '=')(input)
}

/// An action is a bare token not followed by `=`.
fn parse_action(input: &str) -> IResult<&str, &str> {
    let (rest, token) = parse_bare_token(input)?;

    match rest.chars().next() {
        Some('=') => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        ))),
        _ => Ok((rest, token)),
    }
}

fn parse_key_value_pairs(input: &str) -> IResult<&str, HashMap<String, String>> {
    let (input, key_value_pairs) = many0(preceded(multispace0, parse_key_value))(input)?;
    Ok((input, key_value_pairs.into_iter().collect()))
}

fn parse_key_value(input: &str) -> IResult<&str, (String, String)> {
    map(
        separated_pair(parse_key, char('='), parse_value),
        |(key, value)| (key.to_string(), value),
    )(input)
}

fn parse_key(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alphanumeric1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_"), tag("."), tag("-")))),
    ))
    .parse(input)
}

fn parse_value(input: &str) -> IResult<&str, String> {
    alt((
        map(parse_quoted_value, unescape),
        map(
            verify(take_while1(|c: char| !c.is_whitespace()), |value: &str| {
                !value.starts_with('"')
            }),
            |value: &str| value.to_string(),
        ),
    ))(input)
}

fn parse_quoted_value(input: &str) -> IResult<&str, &str> {
    delimited(
        char('"'),
        map(opt(escaped(is_not("\\\""), '\\', alt((tag("\""), tag("\\"))))), |value| {
            value.unwrap_or("")
        }),
        char('"'),
    )(input)
}

fn unescape(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    unescaped.push(escaped);
                }
            }
            c => unescaped.push(c),
        }
    }

    unescaped
}
