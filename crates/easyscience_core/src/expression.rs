//! Arithmetic expressions used by constraints.
//!
//! Expressions are parsed into an AST, compiled into bytecode with variable
//! names resolved to slot indices, and evaluated by a small stack VM that is
//! generic over [`Scalar`] (plain `f64` or `Dual`).

use crate::error::{CoreError, Result};
use crate::traits::Scalar;
use std::collections::HashMap;

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(f64),
    /// Pushes the value of a variable (by slot index) onto the stack.
    LoadVar(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes f(a).
    Call(Function),
}

/// Built-in single-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "tan" => Some(Function::Tan),
            "exp" => Some(Function::Exp),
            "ln" | "log" => Some(Function::Ln),
            "sqrt" => Some(Function::Sqrt),
            "abs" => Some(Function::Abs),
            _ => None,
        }
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Exp => a.exp(),
            Function::Ln => a.ln(),
            Function::Sqrt => a.sqrt(),
            Function::Abs => a.abs(),
        }
    }
}

/// A compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based virtual machine.
///
/// The VM is stateless; `execute` receives the bytecode, the variable slots
/// and a scratch stack, and returns the value left on the stack.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], stack: &mut Vec<T>) -> Result<T> {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::lift(val)),
                OpCode::LoadVar(idx) => {
                    let value = vars.get(idx).copied().ok_or_else(|| {
                        CoreError::Expression(format!("variable slot {idx} is not bound"))
                    })?;
                    stack.push(value);
                }
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = pop(stack)?;
                    stack.push(func.apply(a));
                }
                binary => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        OpCode::Pow => a.powf(b),
                        _ => unreachable!("unary and load ops handled above"),
                    });
                }
            }
        }

        let result = pop(stack)?;
        if !stack.is_empty() {
            return Err(CoreError::Expression(
                "expression left extra values on the stack".to_string(),
            ));
        }
        Ok(result)
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T> {
    stack
        .pop()
        .ok_or_else(|| CoreError::Expression("stack underflow".to_string()))
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Unary(char, Box<Expr>),
    Call(String, Box<Expr>),
}

/// Compiles an AST into bytecode, resolving variable names to slot indices.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new<S: AsRef<str>>(var_names: &[S]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_ref().to_string(), i))
            .collect();
        Self { var_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                let idx = self.var_map.get(name).ok_or_else(|| {
                    CoreError::Expression(format!("unknown variable '{name}'"))
                })?;
                ops.push(OpCode::LoadVar(*idx));
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    other => {
                        return Err(CoreError::Expression(format!(
                            "unknown binary operator '{other}'"
                        )))
                    }
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    '+' => {}
                    other => {
                        return Err(CoreError::Expression(format!(
                            "unknown unary operator '{other}'"
                        )))
                    }
                }
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                let function = Function::from_name(func).ok_or_else(|| {
                    CoreError::Expression(format!("unknown function '{func}'"))
                })?;
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }
}

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.len() > MAX_TOKENS {
        return Err(CoreError::Expression(format!(
            "expression is too long: {} tokens, at most {MAX_TOKENS} are allowed",
            tokens.len()
        )));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(CoreError::Expression(format!(
            "unexpected trailing token {token:?} in '{input}'"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.is_empty() {
                    // exponent only if followed by a digit or a signed digit
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let next = lookahead.peek().copied();
                    let signed = matches!(next, Some('+') | Some('-'));
                    if signed {
                        lookahead.next();
                    }
                    if !matches!(lookahead.peek(), Some(ch) if ch.is_ascii_digit()) {
                        break;
                    }
                    num_str.push(d);
                    chars.next();
                    if signed {
                        if let Some(sign) = chars.next() {
                            num_str.push(sign);
                        }
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| CoreError::Expression(format!("invalid number '{num_str}'")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        Token::Caret
                    } else {
                        Token::Star
                    }
                }
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => {
                    return Err(CoreError::Expression(format!(
                        "unexpected character '{other}'"
                    )))
                }
            });
        }
    }
    Ok(tokens)
}

/// Longest accepted token stream; bounds the depth of left-leaning operator chains.
const MAX_TOKENS: usize = 4096;
/// Deepest accepted nesting of parentheses, calls, signs and exponents.
const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_factor()?;

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(CoreError::Expression(format!(
                "expression is nested deeper than {MAX_NESTING} levels"
            )));
        }
        self.depth += 1;
        let expr = self.parse_signed();
        self.depth -= 1;
        expr
    }

    fn parse_signed(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                Ok(Expr::Unary('-', Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // Right associative, binds tighter than unary minus: -2^2 == -(2^2)
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(CoreError::Expression(format!(
                "unexpected token {token:?}"
            ))),
            None => Err(CoreError::Expression(
                "unexpected end of expression".to_string(),
            )),
        }
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(CoreError::Expression("expected ')'".to_string())),
        }
    }
}

/// A parsed and compiled expression with named variable slots.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpression {
    source: String,
    variables: Vec<String>,
    bytecode: Bytecode,
}

impl CompiledExpression {
    pub fn new<S: AsRef<str>>(source: &str, variables: &[S]) -> Result<Self> {
        let ast = parse(source)?;
        let bytecode = Compiler::new(variables).compile(&ast)?;
        Ok(Self {
            source: source.to_string(),
            variables: variables.iter().map(|v| v.as_ref().to_string()).collect(),
            bytecode,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn evaluate<T: Scalar>(&self, values: &[T]) -> Result<T> {
        if values.len() != self.variables.len() {
            return Err(CoreError::Expression(format!(
                "expression '{}' expects {} values, got {}",
                self.source,
                self.variables.len(),
                values.len()
            )));
        }
        let mut stack = Vec::with_capacity(self.bytecode.ops.len());
        VM::execute(&self.bytecode, values, &mut stack)
    }
}

/// Parses, compiles and evaluates `source` in one go.
pub fn evaluate(source: &str, names: &[&str], values: &[f64]) -> Result<f64> {
    CompiledExpression::new(source, names)?.evaluate(values)
}
