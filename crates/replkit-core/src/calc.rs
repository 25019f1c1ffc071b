//! Built-in calculator engine.
//!
//! A deliberately small stateful language used by the default kernel and the
//! end-to-end tests: 64-bit integer arithmetic with variables that persist
//! across submissions on one kernel instance.
//!
//! Statements are separated by newlines or `;`:
//!
//! - `var x = <expr>` binds a variable (no return value)
//! - `print <expr>` writes the value to standard output
//! - `error <message>` raises a user-level error
//! - `sleep <millis>` suspends, observing cancellation
//! - `<expr>` evaluates; the last expression's value is the submission's
//!   return value

use std::collections::HashMap;

use anyhow::{Context as _, Result, anyhow, bail};
use async_trait::async_trait;
use replkit_protocols::CompletionItem;
use serde_json::Value;
use tokio::time::Duration;

use crate::engine::{ExecutionOutput, LanguageEngine};

const KEYWORDS: [&str; 4] = ["var", "print", "error", "sleep"];

/// Stateful calculator engine.
#[derive(Default)]
pub struct CalcEngine {
    variables: HashMap<String, i64>,
}

impl CalcEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn eval(&self, expression: &str) -> Result<i64> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens: &tokens,
            position: 0,
            variables: &self.variables,
        };
        let value = parser.expression()?;
        if parser.position != tokens.len() {
            bail!("unexpected trailing input in '{expression}'");
        }
        Ok(value)
    }

    async fn run_statement(
        &mut self,
        statement: &str,
        output: &ExecutionOutput,
    ) -> Result<Option<i64>> {
        if let Some(rest) = statement.strip_prefix("var ") {
            let (name, expression) = rest
                .split_once('=')
                .ok_or_else(|| anyhow!("expected 'var <name> = <expression>'"))?;
            let name = name.trim();
            if !is_identifier(name) {
                bail!("invalid variable name: '{name}'");
            }
            let value = self
                .eval(expression.trim())
                .with_context(|| format!("binding '{name}'"))?;
            self.variables.insert(name.to_string(), value);
            return Ok(None);
        }
        if let Some(rest) = statement.strip_prefix("print ") {
            let value = self.eval(rest.trim())?;
            output.stdout(value.to_string());
            return Ok(None);
        }
        if let Some(rest) = statement.strip_prefix("error") {
            bail!("{}", rest.trim());
        }
        if let Some(rest) = statement.strip_prefix("sleep ") {
            let millis: u64 = rest.trim().parse().context("sleep expects milliseconds")?;
            let token = output.cancellation_token();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
                _ = token.cancelled() => bail!("sleep interrupted by cancellation"),
            }
            return Ok(None);
        }
        self.eval(statement).map(Some)
    }
}

#[async_trait]
impl LanguageEngine for CalcEngine {
    fn is_complete(&self, code: &str) -> bool {
        let open = code.chars().filter(|c| *c == '(').count();
        let close = code.chars().filter(|c| *c == ')').count();
        open <= close
    }

    async fn execute(&mut self, code: &str, output: &ExecutionOutput) -> Result<Option<Value>> {
        let mut last = None;
        for statement in code.split(['\n', ';']) {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            last = self.run_statement(statement, output).await?;
        }
        Ok(last.map(Value::from))
    }

    async fn completions(&mut self, code: &str, cursor: usize) -> Vec<CompletionItem> {
        let prefix: String = code
            .chars()
            .take(cursor)
            .collect::<String>()
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        let mut items: Vec<CompletionItem> = self
            .variables
            .keys()
            .map(String::as_str)
            .chain(KEYWORDS)
            .filter(|candidate| candidate.starts_with(&prefix))
            .map(|candidate| CompletionItem {
                display_text: candidate.to_string(),
                insert_text: candidate.to_string(),
            })
            .collect();
        items.sort_by(|a, b| a.display_text.cmp(&b.display_text));
        items.dedup_by(|a, b| a.display_text == b.display_text);
        items
    }

    async fn signature_help(&mut self, code: &str, cursor: usize) -> Vec<String> {
        let prefix: String = code.chars().take(cursor).collect();
        let word = prefix.split_whitespace().next().unwrap_or("");
        match word {
            "var" => vec!["var <name> = <expression>".to_string()],
            "print" => vec!["print <expression>".to_string()],
            "sleep" => vec!["sleep <milliseconds>".to_string()],
            "error" => vec!["error <message>".to_string()],
            _ => Vec::new(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

fn tokenize(expression: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '0'..='9' => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(number.parse()?));
            }
            c if c == '_' || c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d == '_' || d.is_ascii_alphanumeric() {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => bail!("unexpected character '{other}'"),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    variables: &'a HashMap<String, i64>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.position);
        self.position += 1;
        token
    }

    fn expression(&mut self) -> Result<i64> {
        let mut value = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.next();
                    value += self.term()?;
                }
                Token::Minus => {
                    self.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<i64> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.next();
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.next();
                    let divisor = self.factor()?;
                    if divisor == 0 {
                        bail!("division by zero");
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<i64> {
        match self.next().cloned() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Ident(name)) => self
                .variables
                .get(&name)
                .copied()
                .ok_or_else(|| anyhow!("unknown variable '{name}'")),
            Some(Token::Minus) => Ok(-self.factor()?),
            Some(Token::Open) => {
                let value = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => bail!("expected ')'"),
                }
            }
            other => bail!("unexpected token: {other:?}"),
        }
    }
}

#[cfg(test)]
#[path = "calc_tests.rs"]
mod tests;
