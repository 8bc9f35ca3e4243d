//! calculate 工具：安全的四则运算
//!
//! 只接受数字、+ - * / . ( ) 与空白；递归下降求值，支持一元正负号、`**` 幂与 `//` 整除。
//! 整数运算保持整数，`/` 整除时得到整数、否则得到浮点数；除零与溢出返回失败。
//! 表达式长度与嵌套深度有上限，超出时返回失败。

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::registry::{required_str, Params, Tool, ToolError};

const ALLOWED_CHARS: &str = "0123456789+-*/.() ";

/// 表达式最大字符数
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// 括号与一元运算符的最大嵌套层数
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn to_json(self) -> Result<Value, String> {
        match self {
            Number::Int(i) => Ok(json!(i)),
            Number::Float(f) if f.is_finite() => Ok(json!(f)),
            Number::Float(_) => Err("Result is not a finite number".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleStar,
    DoubleSlash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::DoubleStar);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let num = if literal.contains('.') {
                    literal
                        .parse::<f64>()
                        .map(Number::Float)
                        .map_err(|_| format!("Invalid number: {literal}"))?
                } else {
                    literal
                        .parse::<i64>()
                        .map(Number::Int)
                        .map_err(|_| format!("Invalid number: {literal}"))?
                };
                tokens.push(Token::Num(num));
            }
            other => return Err(format!("Unexpected character: {other}")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<Number, String> {
        let mut lhs = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Number, String> {
        let mut lhs = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::DoubleSlash)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    // 所有递归路径（括号、一元符号、幂的右操作数）都经过 unary，在此计数
    fn unary(&mut self) -> Result<Number, String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("Expression too deeply nested".to_string());
        }
        let value = self.unary_inner();
        self.depth -= 1;
        value
    }

    fn unary_inner(&mut self) -> Result<Number, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                let v = self.unary()?;
                match v {
                    Number::Int(i) => i.checked_neg().map(Number::Int).ok_or_else(overflow),
                    Number::Float(f) => Ok(Number::Float(-f)),
                }
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // 幂运算右结合，且比左侧一元负号优先：-2 ** 2 == -4
    fn power(&mut self) -> Result<Number, String> {
        let base = self.atom()?;
        if let Some(Token::DoubleStar) = self.peek() {
            self.pos += 1;
            let exp = self.unary()?;
            return apply(Token::DoubleStar, base, exp);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err("Missing closing parenthesis".to_string()),
                }
            }
            Some(t) => Err(format!("Unexpected token: {t:?}")),
            None => Err("Unexpected end of expression".to_string()),
        }
    }
}

fn overflow() -> String {
    "Integer overflow".to_string()
}

fn apply(op: Token, lhs: Number, rhs: Number) -> Result<Number, String> {
    use Number::{Float, Int};
    let is_zero = rhs.as_f64() == 0.0;
    match (op, lhs, rhs) {
        (Token::Plus, Int(a), Int(b)) => a.checked_add(b).map(Int).ok_or_else(overflow),
        (Token::Minus, Int(a), Int(b)) => a.checked_sub(b).map(Int).ok_or_else(overflow),
        (Token::Star, Int(a), Int(b)) => a.checked_mul(b).map(Int).ok_or_else(overflow),
        (Token::Plus, a, b) => Ok(Float(a.as_f64() + b.as_f64())),
        (Token::Minus, a, b) => Ok(Float(a.as_f64() - b.as_f64())),
        (Token::Star, a, b) => Ok(Float(a.as_f64() * b.as_f64())),
        (Token::Slash | Token::DoubleSlash, _, _) if is_zero => {
            Err("division by zero".to_string())
        }
        (Token::Slash, Int(a), Int(b)) if a.checked_rem(b) == Some(0) => {
            a.checked_div(b).map(Int).ok_or_else(overflow)
        }
        (Token::Slash, a, b) => Ok(Float(a.as_f64() / b.as_f64())),
        (Token::DoubleSlash, Int(a), Int(b)) => {
            let q = a.checked_div_euclid(b).ok_or_else(overflow)?;
            // div_euclid 对负除数向上取整，修正为向下取整
            Ok(Int(if b < 0 && a % b != 0 { q - 1 } else { q }))
        }
        (Token::DoubleSlash, a, b) => Ok(Float((a.as_f64() / b.as_f64()).floor())),
        (Token::DoubleStar, Int(a), Int(b)) if b >= 0 => u32::try_from(b)
            .ok()
            .and_then(|e| a.checked_pow(e))
            .map(Int)
            .ok_or_else(overflow),
        (Token::DoubleStar, a, b) => Ok(Float(a.as_f64().powf(b.as_f64()))),
        (t, _, _) => Err(format!("Unexpected operator: {t:?}")),
    }
}

/// 对表达式求值
pub fn evaluate(expression: &str) -> Result<Number, String> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(format!(
            "Expression too long ({} chars, max {MAX_EXPRESSION_LEN})",
            expression.len()
        ));
    }
    if let Some(bad) = expression.chars().find(|c| !ALLOWED_CHARS.contains(*c)) {
        return Err(format!(
            "Expression contains invalid character '{bad}'. Only basic math operations allowed."
        ));
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("Empty expression".to_string());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!(
            "Unexpected token: {:?}",
            parser.tokens[parser.pos]
        ));
    }
    Ok(value)
}

pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Perform mathematical calculation. Parameters: expression (str) - e.g., '2 + 2', '10 * 5'"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {"type": "string", "description": "Arithmetic expression"}
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, params: Params) -> Result<Params, ToolError> {
        let expression = required_str(&params, "expression")?.trim();
        let result = evaluate(expression)?.to_json()?;
        tracing::debug!(expression = %expression, result = %result, "calculate");

        let mut out = Params::new();
        out.insert("expression".into(), json!(expression));
        out.insert("result".into(), result);
        Ok(out)
    }
}
