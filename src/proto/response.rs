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

use crate::error::Error;

use std::fmt;

/// Response line sent to a client.
#[derive(Debug, Clone)]
pub struct Response {
    /// Response verb.
    verb: String,

    /// Response action, if any.
    action: Option<String>,

    /// Ordered key-value pairs.
    keys: Vec<(&'static str, String)>,
}

impl Response {
    /// Create new [`Response`] for `verb`.
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            action: None,
            keys: Vec::new(),
        }
    }

    /// Create new [`Response`] for `verb`/`action`.
    pub fn with_action(verb: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            action: Some(action.into()),
            keys: Vec::new(),
        }
    }

    /// Append a key-value pair.
    pub fn key(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.keys.push((key, value.into()));
        self
    }

    /// Append `RESULT=<kind>`.
    pub fn result(self, kind: &str) -> Self {
        self.key("RESULT", kind.to_string())
    }

    /// Append `RESULT=OK`.
    pub fn ok(self) -> Self {
        self.result("OK")
    }

    /// Append `RESULT=` and `MESSAGE=` derived from `error`.
    pub fn error(self, error: &Error) -> Self {
        self.result(error.result_kind()).key("MESSAGE", error.result_message())
    }

    /// Serialize the response, including the terminating newline.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verb)?;

        if let Some(action) = &self.action {
            write!(f, " {action}")?;
        }

        for (key, value) in &self.keys {
            write!(f, " {key}={}", quote_value(value))?;
        }

        Ok(())
    }
}

/// Quote `value` for wire use.
///
/// Values containing whitespace, `=`, `"` or nothing at all are double-quoted,
/// with `"` and `\` backslash-escaped.
pub fn quote_value(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value.chars().any(|c| c.is_whitespace() || c == '=' || c == '"' || c == '\\');

    if !needs_quoting {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');

    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }

    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;

    #[test]
    fn plain_response() {
        let response = Response::with_action("HELLO", "REPLY").ok().key("VERSION", "3.3");

        assert_eq!(response.to_line(), "HELLO REPLY RESULT=OK VERSION=3.3\n");
    }

    #[test]
    fn quoted_message() {
        let response = Response::with_action("SESSION", "STATUS")
            .result("I2P_ERROR")
            .key("MESSAGE", "handshake not complete");

        assert_eq!(
            response.to_line(),
            "SESSION STATUS RESULT=I2P_ERROR MESSAGE=\"handshake not complete\"\n",
        );
    }

    #[test]
    fn error_response() {
        let response =
            Response::with_action("SESSION", "STATUS").error(&SessionError::DuplicateId.into());

        assert_eq!(
            response.to_line(),
            "SESSION STATUS RESULT=DUPLICATED_ID MESSAGE=\"session id already in use\"\n",
        );
    }

    #[test]
    fn quoting_rules() {
        assert_eq!(quote_value("plain"), "plain");
        assert_eq!(quote_value("has space"), "\"has space\"");
        assert_eq!(quote_value("a=b"), "\"a=b\"");
        assert_eq!(quote_value("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_value(""), "\"\"");
    }
}
