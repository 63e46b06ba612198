use crate::autodiff::Dual;
use crate::traits::{Arithmetic, ComplexScalar, HomotopySystem};
use anyhow::{anyhow, bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of complex values (plain or dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a decimal literal (by index into `Bytecode::literals`).
    /// Literals are parsed at the precision of the evaluation.
    LoadConst(usize),
    /// Pushes the imaginary unit.
    LoadImaginary,
    /// Pushes the value of a variable (by index).
    /// Indices correspond to the order variables were declared (e.g., 0=x, 1=y).
    LoadVar(usize),
    /// Pushes the path variable.
    LoadTime,
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top value (a), pushes a^n.
    PowInt(u32),
    /// Pops top value (a), pushes -a.
    Neg,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    pub literals: Vec<String>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Stack-based Virtual Machine for evaluating equations.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `vars`: Current point (read-only).
/// - `time`: Value of the path variable; its precision sets the literal precision.
/// - `stack`: A mutable buffer for intermediate computations.
///
/// Returns the result of the evaluation (the value left on the stack).
pub struct VM;

impl VM {
    pub fn execute<A: Arithmetic>(bytecode: &Bytecode, vars: &[A], time: &A, stack: &mut Vec<A>) -> A {
        let digits = time.digits();
        stack.clear();

        for op in &bytecode.ops {
            match op {
                OpCode::LoadConst(idx) => {
                    stack.push(A::literal(&bytecode.literals[*idx], digits));
                }
                OpCode::LoadImaginary => stack.push(A::imaginary_unit(digits)),
                OpCode::LoadVar(idx) => stack.push(vars[*idx].clone()),
                OpCode::LoadTime => stack.push(time.clone()),
                OpCode::Add => Self::binary(stack, |a, b| a + b),
                OpCode::Sub => Self::binary(stack, |a, b| a - b),
                OpCode::Mul => Self::binary(stack, |a, b| a * b),
                OpCode::Div => Self::binary(stack, |a, b| a / b),
                OpCode::PowInt(n) => {
                    if let Some(a) = stack.pop() {
                        stack.push(powi(a, *n, digits));
                    }
                }
                OpCode::Neg => {
                    if let Some(a) = stack.pop() {
                        stack.push(-a);
                    }
                }
            }
        }

        // Compiled bytecode always leaves exactly one value.
        stack.pop().unwrap_or_else(|| A::literal("0", digits))
    }

    fn binary<A: Arithmetic>(stack: &mut Vec<A>, op: impl FnOnce(A, A) -> A) {
        if let (Some(b), Some(a)) = (stack.pop(), stack.pop()) {
            stack.push(op(a, b));
        }
    }
}

/// Integer power by repeated squaring.
fn powi<A: Arithmetic>(base: A, exponent: u32, digits: u32) -> A {
    let mut result = A::literal("1", digits);
    let mut square = base;
    let mut n = exponent;
    while n > 0 {
        if n & 1 == 1 {
            result = result * square.clone();
        }
        n >>= 1;
        if n > 0 {
            square = square.clone() * square;
        }
    }
    result
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Decimal literal, kept as written.
    Number(String),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable names to indices; `I` is the imaginary unit unless a
/// variable shadows it.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub path_variable: String,
}

impl Compiler {
    pub fn new(var_names: &[String], path_variable: &str) -> Self {
        let mut var_map = HashMap::new();
        for (i, name) in var_names.iter().enumerate() {
            var_map.insert(name.clone(), i);
        }
        Self {
            var_map,
            path_variable: path_variable.to_string(),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut bytecode = Bytecode::new();
        self.compile_recursive(expr, &mut bytecode)?;
        Ok(bytecode)
    }

    fn compile_recursive(&self, expr: &Expr, code: &mut Bytecode) -> Result<()> {
        match expr {
            Expr::Number(text) => {
                text.parse::<f64>()
                    .map_err(|_| anyhow!("Malformed number literal: {}", text))?;
                code.literals.push(text.clone());
                code.ops.push(OpCode::LoadConst(code.literals.len() - 1));
            }
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    code.ops.push(OpCode::LoadVar(idx));
                } else if *name == self.path_variable {
                    code.ops.push(OpCode::LoadTime);
                } else if name == "I" {
                    code.ops.push(OpCode::LoadImaginary);
                } else {
                    bail!("Unknown variable: {}", name);
                }
            }
            Expr::Binary(left, '^', right) => {
                let exponent = match &**right {
                    Expr::Number(text) => text.parse::<u32>().ok(),
                    _ => None,
                };
                let Some(exponent) = exponent else {
                    bail!("Exponents must be non-negative integer literals, got {:?}", right);
                };
                self.compile_recursive(left, code)?;
                code.ops.push(OpCode::PowInt(exponent));
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, code)?;
                self.compile_recursive(right, code)?;
                match op {
                    '+' => code.ops.push(OpCode::Add),
                    '-' => code.ops.push(OpCode::Sub),
                    '*' => code.ops.push(OpCode::Mul),
                    '/' => code.ops.push(OpCode::Div),
                    _ => bail!("Unknown binary operator: {}", op),
                }
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, code)?;
                match op {
                    '-' => code.ops.push(OpCode::Neg),
                    _ => bail!("Unknown unary operator: {}", op),
                }
            }
        }
        Ok(())
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        bail!("Unexpected trailing token {:?} in '{}'", token, input);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
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
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // optional exponent: e5, e-5, E+5
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Identifier(chars[start..i].iter().collect()));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => bail!("Unexpected character '{}' in '{}'", c, input),
            };
            tokens.push(token);
            i += 1;
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    // `^` binds tighter than unary minus: -x^2 == -(x^2).
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_primary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    bail!("Function calls are not supported: {}(...)", name);
                }
                Ok(Expr::Variable(name))
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                match self.consume() {
                    Some(Token::RParen) => Ok(expr),
                    _ => bail!("Expected ')'"),
                }
            }
            other => bail!("Unexpected token {:?}", other),
        }
    }
}

// --- EquationSystem ---

/// A square homotopy compiled from expression strings, evaluated by the VM.
/// Contains one bytecode expression per function.
#[derive(Debug, Clone)]
pub struct EquationSystem {
    variables: Vec<String>,
    path_variable: String,
    equations: Vec<Bytecode>,
    homogenizing_variable: Option<usize>,
}

impl EquationSystem {
    /// Compiles `functions` in `variables` and the path variable.
    ///
    /// The system must be square: one function per variable.
    pub fn new(variables: &[&str], path_variable: &str, functions: &[&str]) -> Result<Self> {
        if variables.is_empty() {
            bail!("System has zero dimension.");
        }
        if functions.len() != variables.len() {
            bail!(
                "System must be square: {} functions in {} variables.",
                functions.len(),
                variables.len()
            );
        }
        let variables: Vec<String> = variables.iter().map(|v| v.to_string()).collect();
        let compiler = Compiler::new(&variables, path_variable);

        let mut equations = Vec::with_capacity(functions.len());
        for (i, source) in functions.iter().enumerate() {
            let expr = parse(source).with_context(|| format!("Failed to parse function {}", i))?;
            let code = compiler
                .compile(&expr)
                .with_context(|| format!("Failed to compile function {}", i))?;
            equations.push(code);
        }

        Ok(Self {
            variables,
            path_variable: path_variable.to_string(),
            equations,
            homogenizing_variable: None,
        })
    }

    /// Marks `name` as the homogenizing coordinate used by `dehomogenize_point`.
    pub fn with_homogenizing_variable(mut self, name: &str) -> Result<Self> {
        let idx = self
            .variables
            .iter()
            .position(|v| v == name)
            .ok_or_else(|| anyhow!("Unknown homogenizing variable: {}", name))?;
        self.homogenizing_variable = Some(idx);
        Ok(self)
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn path_variable(&self) -> &str {
        &self.path_variable
    }

    fn evaluate_with<A: Arithmetic>(&self, vars: &[A], time: &A) -> Vec<A> {
        let mut stack = Vec::with_capacity(32);
        self.equations
            .iter()
            .map(|eq| VM::execute(eq, vars, time, &mut stack))
            .collect()
    }
}

impl HomotopySystem for EquationSystem {
    fn num_variables(&self) -> usize {
        self.variables.len()
    }

    fn evaluate<T: ComplexScalar>(&self, x: &DVector<T>, t: &T) -> DVector<T> {
        let vars: Vec<T> = x.iter().cloned().collect();
        DVector::from_vec(self.evaluate_with(&vars, t))
    }

    fn jacobian<T: ComplexScalar>(&self, x: &DVector<T>, t: &T) -> DMatrix<T> {
        let n = self.num_variables();
        let dual_t = Dual::constant(t.clone());

        // Column j is the directional derivative along e_j.
        let mut columns: Vec<Vec<T>> = Vec::with_capacity(n);
        for j in 0..n {
            let dual_x: Vec<Dual<T>> = x
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    if i == j {
                        Dual::variable(v.clone())
                    } else {
                        Dual::constant(v.clone())
                    }
                })
                .collect();
            let out = self.evaluate_with(&dual_x, &dual_t);
            columns.push(out.into_iter().map(|d| d.eps).collect());
        }

        DMatrix::from_fn(self.equations.len(), n, |i, j| columns[j][i].clone())
    }

    fn time_derivative<T: ComplexScalar>(&self, x: &DVector<T>, t: &T) -> DVector<T> {
        let dual_x: Vec<Dual<T>> = x.iter().map(|v| Dual::constant(v.clone())).collect();
        let dual_t = Dual::variable(t.clone());
        let out = self.evaluate_with(&dual_x, &dual_t);
        DVector::from_iterator(out.len(), out.into_iter().map(|d| d.eps))
    }

    fn dehomogenize_point<T: ComplexScalar>(&self, x: &DVector<T>) -> DVector<T> {
        match self.homogenizing_variable {
            None => x.clone(),
            Some(h) => {
                let scale = x[h].clone();
                let affine: Vec<T> = x
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != h)
                    .map(|(_, v)| v.clone() / scale.clone())
                    .collect();
                DVector::from_vec(affine)
            }
        }
    }
}
