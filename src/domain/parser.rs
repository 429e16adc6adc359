//! Expression parser for expense formulas.
//!
//! This module implements a recursive descent parser for the arithmetic
//! expressions stored in formulas (for example `hours * hourly_rate`). The
//! grammar is closed: an expression can only name its bound parameters, the
//! whitelisted functions and the members of the `math` namespace, so there
//! is nothing for an expression to reach beyond arithmetic on its inputs.
//!
//! # BNF Grammar
//!
//! ```bnf
//! Expression     ::= Addition
//! Addition       ::= Multiplication ( ( "+" | "-" ) Multiplication )*
//! Multiplication ::= Unary ( ( "*" | "/" | "//" | "%" ) Unary )*
//! Unary          ::= ( "+" | "-" ) Unary | Power
//! Power          ::= Primary ( ( "**" | "^" ) Unary )?
//! Primary        ::= Number | Name | Call | "(" Expression ")"
//! Call           ::= Name "(" ArgumentList? ")"
//! ArgumentList   ::= Expression ( "," Expression )* ","?
//! Name           ::= Identifier | "math" "." Identifier
//! Number         ::= [0-9]* ( "." [0-9]* )? ( [eE] [+-]? [0-9]+ )?
//! Identifier     ::= [A-Za-z_][A-Za-z0-9_]*
//! ```
//!
//! Precedence follows the usual arithmetic rules:
//! - Addition and subtraction bind loosest
//! - Multiplication, division, floor division and modulo
//! - Unary plus and minus
//! - Power binds tighter than a unary operator on its left, so `-2 ** 2`
//!   is `-(2 ** 2)`, and is right-associative
//! - Parentheses override precedence

use std::collections::HashMap;

use super::models::Bindings;

/// The only namespace an expression may use attribute syntax on.
pub const MATH_NAMESPACE: &str = "math";

/// Expressions longer than this are refused before tokenizing.
pub const MAX_EXPRESSION_LENGTH: usize = 4096;

/// Maximum nesting of unary operators, parentheses and calls.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Represents a token in the expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Number(f64),
    Identifier(String),

    // Operators
    Plus,
    Minus,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
    PowerAlt, // ^ alternative to **

    // Delimiters
    LeftParen,
    RightParen,
    Comma,
    Dot,

    Eof,
}

/// Represents an Abstract Syntax Tree node for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),

    /// A bound parameter, or a namespaced constant such as `math.pi`.
    Variable(String),

    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
    },

    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
    },

    /// A whitelisted function call; namespaced names keep their prefix.
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Collects the names this expression reads, in first-appearance order.
    pub fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                if !out.iter().any(|seen| seen == name) {
                    out.push(name.clone());
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expr::Unary { operand, .. } => operand.collect_variables(out),
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_variables(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    FloorDivide,
    Modulo,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

/// Lexical analyzer for tokenizing expressions.
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            input: chars,
            position: 0,
            current_char,
        }
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.input.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_digits(&mut self, out: &mut String) {
        while let Some(ch) = self.current_char {
            if ch.is_ascii_digit() {
                out.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Reads a number token: integer, decimal, or exponent form.
    fn read_number(&mut self) -> Result<f64, String> {
        let mut number_str = String::new();

        self.read_digits(&mut number_str);

        if self.current_char == Some('.') {
            number_str.push('.');
            self.advance();
            self.read_digits(&mut number_str);
        }

        if matches!(self.current_char, Some('e' | 'E')) {
            number_str.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.current_char {
                number_str.push(sign);
                self.advance();
            }
            let before = number_str.len();
            self.read_digits(&mut number_str);
            if number_str.len() == before {
                return Err(format!("Invalid number: {}", number_str));
            }
        }

        let value = number_str
            .parse::<f64>()
            .map_err(|_| format!("Invalid number: {}", number_str))?;
        if !value.is_finite() {
            return Err(format!("Number out of range: {}", number_str));
        }
        Ok(value)
    }

    fn read_identifier(&mut self) -> String {
        let mut identifier = String::new();

        while let Some(ch) = self.current_char {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                identifier.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        identifier
    }

    /// Gets the next token from the input.
    pub fn next_token(&mut self) -> Result<Token, String> {
        self.skip_whitespace();

        match self.current_char {
            None => Ok(Token::Eof),

            Some(ch) => match ch {
                '0'..='9' => Ok(Token::Number(self.read_number()?)),

                '.' if self.peek().is_some_and(|next| next.is_ascii_digit()) => {
                    Ok(Token::Number(self.read_number()?))
                }

                'A'..='Z' | 'a'..='z' | '_' => Ok(Token::Identifier(self.read_identifier())),

                '+' => {
                    self.advance();
                    Ok(Token::Plus)
                }

                '-' => {
                    self.advance();
                    Ok(Token::Minus)
                }

                '*' => {
                    self.advance();
                    if self.current_char == Some('*') {
                        self.advance();
                        Ok(Token::Power)
                    } else {
                        Ok(Token::Multiply)
                    }
                }

                '/' => {
                    self.advance();
                    if self.current_char == Some('/') {
                        self.advance();
                        Ok(Token::FloorDivide)
                    } else {
                        Ok(Token::Divide)
                    }
                }

                '%' => {
                    self.advance();
                    Ok(Token::Modulo)
                }

                '^' => {
                    self.advance();
                    Ok(Token::PowerAlt)
                }

                '(' => {
                    self.advance();
                    Ok(Token::LeftParen)
                }

                ')' => {
                    self.advance();
                    Ok(Token::RightParen)
                }

                ',' => {
                    self.advance();
                    Ok(Token::Comma)
                }

                '.' => {
                    self.advance();
                    Ok(Token::Dot)
                }

                _ => Err(format!("Unexpected character: '{}'", ch)),
            },
        }
    }
}

/// Function signature for whitelisted functions.
pub type FunctionImpl = fn(&[f64]) -> Result<f64, String>;

/// The closed set of functions and constants an expression may use.
///
/// Top-level names (`abs`, `round`, `min`, `max`, `sum`, `pow`) are stored
/// as-is; namespace members are stored qualified, e.g. `math.sqrt`.
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionImpl>,
    constants: HashMap<String, f64>,
}

impl FunctionRegistry {
    /// Creates a registry holding the built-in whitelist.
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
            constants: HashMap::new(),
        };

        registry.register_builtin_functions();
        registry.register_math_namespace();
        registry
    }

    pub fn register_function(&mut self, name: &str, func: FunctionImpl) {
        self.functions.insert(name.to_string(), func);
    }

    pub fn register_constant(&mut self, name: &str, value: f64) {
        self.constants.insert(name.to_string(), value);
    }

    pub fn get_function(&self, name: &str) -> Option<&FunctionImpl> {
        self.functions.get(name)
    }

    pub fn get_constant(&self, name: &str) -> Option<f64> {
        self.constants.get(name).copied()
    }

    /// Returns true if `name` is a function or constant of the whitelist.
    pub fn is_reserved(&self, name: &str) -> bool {
        self.functions.contains_key(name) || self.constants.contains_key(name)
    }

    fn register_builtin_functions(&mut self) {
        self.register_function("abs", |args| {
            expect_arity("abs", args, 1)?;
            Ok(args[0].abs())
        });

        self.register_function("round", |args| match args.len() {
            1 => Ok(args[0].round_ties_even()),
            2 => round_to_places(args[0], args[1].trunc()),
            _ => Err("round() takes 1 or 2 arguments".to_string()),
        });

        self.register_function("min", |args| {
            args.iter()
                .copied()
                .reduce(f64::min)
                .ok_or_else(|| "min() requires at least one argument".to_string())
        });

        self.register_function("max", |args| {
            args.iter()
                .copied()
                .reduce(f64::max)
                .ok_or_else(|| "max() requires at least one argument".to_string())
        });

        self.register_function("sum", |args| Ok(args.iter().sum()));

        self.register_function("pow", |args| {
            expect_arity("pow", args, 2)?;
            Ok(args[0].powf(args[1]))
        });
    }

    fn register_math_namespace(&mut self) {
        self.register_constant("math.pi", std::f64::consts::PI);
        self.register_constant("math.e", std::f64::consts::E);
        self.register_constant("math.tau", std::f64::consts::TAU);

        self.register_function("math.sqrt", |args| {
            expect_arity("math.sqrt", args, 1)?;
            if args[0] < 0.0 {
                Err("math domain error".to_string())
            } else {
                Ok(args[0].sqrt())
            }
        });
        self.register_function("math.exp", |args| unary("math.exp", args, f64::exp));
        self.register_function("math.log", |args| match args.len() {
            1 => domain_checked(args[0] > 0.0, args[0].ln()),
            2 => domain_checked(args[0] > 0.0 && args[1] > 0.0 && args[1] != 1.0, args[0].log(args[1])),
            _ => Err("math.log() takes 1 or 2 arguments".to_string()),
        });
        self.register_function("math.log10", |args| {
            expect_arity("math.log10", args, 1)?;
            domain_checked(args[0] > 0.0, args[0].log10())
        });
        self.register_function("math.log2", |args| {
            expect_arity("math.log2", args, 1)?;
            domain_checked(args[0] > 0.0, args[0].log2())
        });
        self.register_function("math.sin", |args| unary("math.sin", args, f64::sin));
        self.register_function("math.cos", |args| unary("math.cos", args, f64::cos));
        self.register_function("math.tan", |args| unary("math.tan", args, f64::tan));
        self.register_function("math.asin", |args| unary("math.asin", args, f64::asin));
        self.register_function("math.acos", |args| unary("math.acos", args, f64::acos));
        self.register_function("math.atan", |args| unary("math.atan", args, f64::atan));
        self.register_function("math.atan2", |args| {
            expect_arity("math.atan2", args, 2)?;
            Ok(args[0].atan2(args[1]))
        });
        self.register_function("math.sinh", |args| unary("math.sinh", args, f64::sinh));
        self.register_function("math.cosh", |args| unary("math.cosh", args, f64::cosh));
        self.register_function("math.tanh", |args| unary("math.tanh", args, f64::tanh));
        self.register_function("math.floor", |args| unary("math.floor", args, f64::floor));
        self.register_function("math.ceil", |args| unary("math.ceil", args, f64::ceil));
        self.register_function("math.trunc", |args| unary("math.trunc", args, f64::trunc));
        self.register_function("math.fabs", |args| unary("math.fabs", args, f64::abs));
        self.register_function("math.degrees", |args| unary("math.degrees", args, f64::to_degrees));
        self.register_function("math.radians", |args| unary("math.radians", args, f64::to_radians));
        self.register_function("math.hypot", |args| {
            Ok(args.iter().map(|x| x * x).sum::<f64>().sqrt())
        });
        self.register_function("math.pow", |args| {
            expect_arity("math.pow", args, 2)?;
            Ok(args[0].powf(args[1]))
        });
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_arity(name: &str, args: &[f64], expected: usize) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "{}() takes exactly {} argument{} ({} given)",
            name,
            expected,
            if expected == 1 { "" } else { "s" },
            args.len()
        ))
    }
}

fn unary(name: &str, args: &[f64], op: fn(f64) -> f64) -> Result<f64, String> {
    expect_arity(name, args, 1)?;
    Ok(op(args[0]))
}

fn domain_checked(in_domain: bool, value: f64) -> Result<f64, String> {
    if in_domain {
        Ok(value)
    } else {
        Err("math domain error".to_string())
    }
}

/// Recursive descent parser for formula expressions.
pub struct Parser {
    lexer: Lexer,
    current_token: Token,
    depth: usize,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, String> {
        if input.chars().count() > MAX_EXPRESSION_LENGTH {
            return Err(format!(
                "Expression is longer than {} characters",
                MAX_EXPRESSION_LENGTH
            ));
        }

        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token()?;

        Ok(Self {
            lexer,
            current_token,
            depth: 0,
        })
    }

    fn advance(&mut self) -> Result<(), String> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        if std::mem::discriminant(&self.current_token) == std::mem::discriminant(&expected) {
            self.advance()
        } else {
            Err(format!("Expected {:?}, found {:?}", expected, self.current_token))
        }
    }

    /// Parses the whole input as one expression.
    pub fn parse(&mut self) -> Result<Expr, String> {
        if self.current_token == Token::Eof {
            return Err("Empty expression".to_string());
        }

        let expr = self.parse_addition()?;

        if self.current_token != Token::Eof {
            return Err(format!("Unexpected token at end: {:?}", self.current_token));
        }

        Ok(expr)
    }

    fn parse_addition(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_multiplication()?;

        while matches!(self.current_token, Token::Plus | Token::Minus) {
            let op = match self.current_token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Subtract,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_multiplication()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_multiplication(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        while matches!(
            self.current_token,
            Token::Multiply | Token::Divide | Token::FloorDivide | Token::Modulo
        ) {
            let op = match self.current_token {
                Token::Multiply => BinaryOp::Multiply,
                Token::Divide => BinaryOp::Divide,
                Token::FloorDivide => BinaryOp::FloorDivide,
                Token::Modulo => BinaryOp::Modulo,
                _ => unreachable!(),
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                left: Box::new(left),
                operator: op,
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Parses unary expressions. Every nested construct passes through here,
    /// so this is where the nesting budget is enforced.
    fn parse_unary(&mut self) -> Result<Expr, String> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(format!(
                "Expression nesting exceeds {} levels",
                MAX_NESTING_DEPTH
            ));
        }

        let result = match self.current_token {
            Token::Plus | Token::Minus => {
                let operator = if self.current_token == Token::Plus {
                    UnaryOp::Plus
                } else {
                    UnaryOp::Minus
                };
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    operator,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_power(),
        };

        self.depth -= 1;
        result
    }

    /// Parses power expressions (right-associative).
    fn parse_power(&mut self) -> Result<Expr, String> {
        let left = self.parse_primary()?;

        if matches!(self.current_token, Token::Power | Token::PowerAlt) {
            self.advance()?;
            let right = self.parse_unary()?;
            Ok(Expr::Binary {
                left: Box::new(left),
                operator: BinaryOp::Power,
                right: Box::new(right),
            })
        } else {
            Ok(left)
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match &self.current_token {
            Token::Number(value) => {
                let value = *value;
                self.advance()?;
                Ok(Expr::Number(value))
            }

            Token::Identifier(name) => {
                let name = self.parse_name(name.clone())?;

                if self.current_token == Token::LeftParen {
                    self.advance()?;
                    let args = self.parse_argument_list()?;
                    self.expect(Token::RightParen)?;
                    Ok(Expr::Call { name, args })
                } else {
                    Ok(Expr::Variable(name))
                }
            }

            Token::LeftParen => {
                self.advance()?;
                let expr = self.parse_addition()?;
                self.expect(Token::RightParen)?;
                Ok(expr)
            }

            _ => Err(format!("Unexpected token: {:?}", self.current_token)),
        }
    }

    /// Parses a possibly qualified name. Attribute access is only allowed on
    /// the `math` namespace and only one level deep.
    fn parse_name(&mut self, head: String) -> Result<String, String> {
        self.advance()?;

        if self.current_token != Token::Dot {
            return Ok(head);
        }

        if head != MATH_NAMESPACE {
            return Err(format!("Attribute access on '{}' is not allowed", head));
        }

        self.advance()?;
        match &self.current_token {
            Token::Identifier(member) => {
                let qualified = format!("{}.{}", head, member);
                self.advance()?;
                if self.current_token == Token::Dot {
                    return Err(format!("Attribute access on '{}' is not allowed", qualified));
                }
                Ok(qualified)
            }
            other => Err(format!("Expected name after '{}.', found {:?}", head, other)),
        }
    }

    fn parse_argument_list(&mut self) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();

        if self.current_token == Token::RightParen {
            return Ok(args);
        }

        args.push(self.parse_addition()?);

        while self.current_token == Token::Comma {
            self.advance()?;
            // Trailing comma before ')'
            if self.current_token == Token::RightParen {
                break;
            }
            args.push(self.parse_addition()?);
        }

        Ok(args)
    }
}

/// Expression evaluator that walks the AST and computes results.
///
/// Names resolve to registry constants first and to the bindings second;
/// there is no other scope.
pub struct ExpressionEvaluator<'a> {
    bindings: &'a Bindings,
    function_registry: &'a FunctionRegistry,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(bindings: &'a Bindings, function_registry: &'a FunctionRegistry) -> Self {
        Self {
            bindings,
            function_registry,
        }
    }

    /// Evaluates an expression AST to a finite numeric result.
    pub fn evaluate(&self, expr: &Expr) -> Result<f64, String> {
        match expr {
            Expr::Number(value) => Ok(*value),

            Expr::Variable(name) => {
                let value = self
                    .function_registry
                    .get_constant(name)
                    .or_else(|| self.bindings.get(name).copied())
                    .ok_or_else(|| format!("name '{}' is not defined", name))?;
                finite(value)
            }

            Expr::Binary { left, operator, right } => {
                let left_val = self.evaluate(left)?;
                let right_val = self.evaluate(right)?;

                let value = match operator {
                    BinaryOp::Add => left_val + right_val,
                    BinaryOp::Subtract => left_val - right_val,
                    BinaryOp::Multiply => left_val * right_val,
                    BinaryOp::Divide => {
                        if right_val == 0.0 {
                            return Err("division by zero".to_string());
                        }
                        left_val / right_val
                    }
                    BinaryOp::FloorDivide => {
                        if right_val == 0.0 {
                            return Err("integer division or modulo by zero".to_string());
                        }
                        (left_val / right_val).floor()
                    }
                    BinaryOp::Modulo => {
                        if right_val == 0.0 {
                            return Err("modulo by zero".to_string());
                        }
                        // Result takes the sign of the divisor.
                        left_val - right_val * (left_val / right_val).floor()
                    }
                    BinaryOp::Power => {
                        if left_val == 0.0 && right_val < 0.0 {
                            return Err("zero cannot be raised to a negative power".to_string());
                        }
                        left_val.powf(right_val)
                    }
                };
                finite(value)
            }

            Expr::Unary { operator, operand } => {
                let operand_val = self.evaluate(operand)?;

                finite(match operator {
                    UnaryOp::Plus => operand_val,
                    UnaryOp::Minus => -operand_val,
                })
            }

            Expr::Call { name, args } => {
                let func = self
                    .function_registry
                    .get_function(name)
                    .ok_or_else(|| format!("name '{}' is not defined", name))?;

                let arg_values = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                finite(func(&arg_values)?)
            }
        }
    }
}

/// Rounds half to even at `places` decimal digits (negative rounds to tens,
/// hundreds, ...). Scales too fine to change the value return it unchanged and
/// scales coarser than any finite value give a signed zero.
fn round_to_places(value: f64, places: f64) -> Result<f64, String> {
    // Every f64 at or above 2^52 in magnitude is already a whole number.
    const INTEGRAL: f64 = 4_503_599_627_370_496.0;

    if places > f64::from(f64::MAX_10_EXP) {
        return Ok(value);
    }
    if places < -f64::from(f64::MAX_10_EXP) {
        return Ok(0.0_f64.copysign(value));
    }
    if places < 0.0 {
        let divisor = 10f64.powi(-places as i32);
        return Ok((value / divisor).round_ties_even() * divisor);
    }
    let multiplier = 10f64.powi(places as i32);
    let scaled = value * multiplier;
    if !scaled.is_finite() || scaled.abs() >= INTEGRAL {
        return Ok(value);
    }
    Ok(scaled.round_ties_even() / multiplier)
}

fn finite(value: f64) -> Result<f64, String> {
    if value.is_nan() {
        Err("math domain error".to_string())
    } else if value.is_infinite() {
        Err("numerical result out of range".to_string())
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, f64)]) -> Bindings {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn eval(input: &str, pairs: &[(&str, f64)]) -> Result<f64, String> {
        let ast = Parser::new(input)?.parse()?;
        let registry = FunctionRegistry::new();
        let values = bindings(pairs);
        ExpressionEvaluator::new(&values, &registry).evaluate(&ast)
    }

    #[test]
    fn test_lexer_numbers() {
        let mut lexer = Lexer::new("42 3.75 0.5 .25 1e3 2.5E-2");

        assert_eq!(lexer.next_token().unwrap(), Token::Number(42.0));
        assert_eq!(lexer.next_token().unwrap(), Token::Number(3.75));
        assert_eq!(lexer.next_token().unwrap(), Token::Number(0.5));
        assert_eq!(lexer.next_token().unwrap(), Token::Number(0.25));
        assert_eq!(lexer.next_token().unwrap(), Token::Number(1000.0));
        assert_eq!(lexer.next_token().unwrap(), Token::Number(0.025));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_lexer_operators() {
        let mut lexer = Lexer::new("+ - * / // % ** ^");

        assert_eq!(lexer.next_token().unwrap(), Token::Plus);
        assert_eq!(lexer.next_token().unwrap(), Token::Minus);
        assert_eq!(lexer.next_token().unwrap(), Token::Multiply);
        assert_eq!(lexer.next_token().unwrap(), Token::Divide);
        assert_eq!(lexer.next_token().unwrap(), Token::FloorDivide);
        assert_eq!(lexer.next_token().unwrap(), Token::Modulo);
        assert_eq!(lexer.next_token().unwrap(), Token::Power);
        assert_eq!(lexer.next_token().unwrap(), Token::PowerAlt);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_lexer_identifiers_keep_case() {
        let mut lexer = Lexer::new("hourly_rate Hours _tmp math.pi");

        assert_eq!(lexer.next_token().unwrap(), Token::Identifier("hourly_rate".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Identifier("Hours".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Identifier("_tmp".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Identifier("math".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Dot);
        assert_eq!(lexer.next_token().unwrap(), Token::Identifier("pi".to_string()));
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_lexer_rejects_foreign_characters() {
        let mut lexer = Lexer::new(";");
        assert!(lexer.next_token().is_err());
        assert!(Lexer::new("'x'").next_token().is_err());
        assert!(Lexer::new("[1]").next_token().is_err());
        assert!(Lexer::new("1e").next_token().is_err());
        assert!(Lexer::new("1e999").next_token().is_err());
    }

    #[test]
    fn test_parser_variables() {
        let expr = Parser::new("hours").unwrap().parse().unwrap();
        assert_eq!(expr, Expr::Variable("hours".to_string()));

        let expr = Parser::new("math.pi").unwrap().parse().unwrap();
        assert_eq!(expr, Expr::Variable("math.pi".to_string()));
    }

    #[test]
    fn test_parser_operator_precedence() {
        // 2 + 3 * 4 is parsed as 2 + (3 * 4)
        let expr = Parser::new("2 + 3 * 4").unwrap().parse().unwrap();
        match expr {
            Expr::Binary { left, operator: BinaryOp::Add, right } => {
                assert_eq!(*left, Expr::Number(2.0));
                match right.as_ref() {
                    Expr::Binary { left: mult_left, operator: BinaryOp::Multiply, right: mult_right } => {
                        assert_eq!(**mult_left, Expr::Number(3.0));
                        assert_eq!(**mult_right, Expr::Number(4.0));
                    }
                    _ => panic!("Expected multiplication as right operand"),
                }
            }
            _ => panic!("Expected addition at top level"),
        }
    }

    #[test]
    fn test_parser_power_binds_tighter_than_negation() {
        // -2 ** 2 is -(2 ** 2)
        let expr = Parser::new("-2 ** 2").unwrap().parse().unwrap();
        match expr {
            Expr::Unary { operator: UnaryOp::Minus, operand } => {
                assert!(matches!(operand.as_ref(), Expr::Binary { operator: BinaryOp::Power, .. }));
            }
            _ => panic!("Expected negation at top level"),
        }
    }

    #[test]
    fn test_parser_power_right_associative() {
        // 2 ** 3 ** 2 is 2 ** (3 ** 2)
        let expr = Parser::new("2 ** 3 ** 2").unwrap().parse().unwrap();
        match expr {
            Expr::Binary { left, operator: BinaryOp::Power, right } => {
                assert_eq!(*left, Expr::Number(2.0));
                assert!(matches!(right.as_ref(), Expr::Binary { operator: BinaryOp::Power, .. }));
            }
            _ => panic!("Expected power at top level"),
        }
    }

    #[test]
    fn test_parser_calls() {
        let expr = Parser::new("max(a, b, 3,)").unwrap().parse().unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "max");
                assert_eq!(args.len(), 3);
                assert_eq!(args[0], Expr::Variable("a".to_string()));
            }
            _ => panic!("Expected call"),
        }

        let expr = Parser::new("math.sqrt(x)").unwrap().parse().unwrap();
        assert!(matches!(expr, Expr::Call { ref name, .. } if name == "math.sqrt"));
    }

    #[test]
    fn test_parser_rejects_attribute_traversal() {
        assert!(Parser::new("os.system").unwrap().parse().is_err());
        assert!(Parser::new("math.pi.real").unwrap().parse().is_err());
        assert!(Parser::new("x.__class__").unwrap().parse().is_err());
        assert!(Parser::new("math.(1)").unwrap().parse().is_err());
    }

    #[test]
    fn test_parser_error_handling() {
        assert!(Parser::new("").unwrap().parse().is_err());
        assert!(Parser::new("2 +").unwrap().parse().is_err());
        assert!(Parser::new("(2 + 3").unwrap().parse().is_err());
        assert!(Parser::new("sum(").unwrap().parse().is_err());
        assert!(Parser::new("2 3").unwrap().parse().is_err());
        assert!(Parser::new("a = 1").unwrap().parse().is_err());
    }

    #[test]
    fn test_parser_nesting_budget() {
        let deep = format!("{}1{}", "(".repeat(MAX_NESTING_DEPTH + 1), ")".repeat(MAX_NESTING_DEPTH + 1));
        assert!(Parser::new(&deep).unwrap().parse().is_err());

        let shallow = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!(Parser::new(&shallow).unwrap().parse().is_ok());

        assert!(Parser::new(&"1+".repeat(MAX_EXPRESSION_LENGTH)).is_err());
    }

    #[test]
    fn test_evaluate_arithmetic() {
        assert_eq!(eval("2 + 3 * 4", &[]).unwrap(), 14.0);
        assert_eq!(eval("(2 + 3) * 4", &[]).unwrap(), 20.0);
        assert_eq!(eval("2 ** 3 ** 2", &[]).unwrap(), 512.0);
        assert_eq!(eval("3 ^ 2", &[]).unwrap(), 9.0);
        assert_eq!(eval("-2 ** 2", &[]).unwrap(), -4.0);
        assert_eq!(eval("2 ** -1", &[]).unwrap(), 0.5);
        assert_eq!(eval("7 // 2", &[]).unwrap(), 3.0);
        assert_eq!(eval("-7 // 2", &[]).unwrap(), -4.0);
        assert_eq!(eval("-7 % 3", &[]).unwrap(), 2.0);
        assert_eq!(eval("7 % -3", &[]).unwrap(), -2.0);
        assert_eq!(eval("--5", &[]).unwrap(), 5.0);
    }

    #[test]
    fn test_evaluate_bindings() {
        let result = eval("hours * hourly_rate", &[("hours", 40.0), ("hourly_rate", 200.0)]);
        assert_eq!(result.unwrap(), 8000.0);

        let result = eval("Hours", &[("hours", 1.0)]);
        assert_eq!(result.unwrap_err(), "name 'Hours' is not defined");
    }

    #[test]
    fn test_evaluate_whitelisted_functions() {
        assert_eq!(eval("abs(-3)", &[]).unwrap(), 3.0);
        assert_eq!(eval("round(2.5)", &[]).unwrap(), 2.0);
        assert_eq!(eval("round(3.5)", &[]).unwrap(), 4.0);
        assert!((eval("round(1.23456, 2)", &[]).unwrap() - 1.23).abs() < 1e-12);
        assert_eq!(eval("round(1250, -2)", &[]).unwrap(), 1200.0);
        assert_eq!(eval("min(4, 2, 8)", &[]).unwrap(), 2.0);
        assert_eq!(eval("max(4, 2, 8)", &[]).unwrap(), 8.0);
        assert_eq!(eval("sum(1, 2, 3)", &[]).unwrap(), 6.0);
        assert_eq!(eval("sum()", &[]).unwrap(), 0.0);
        assert_eq!(eval("pow(2, 10)", &[]).unwrap(), 1024.0);
        assert_eq!(eval("math.sqrt(16)", &[]).unwrap(), 4.0);
        assert_eq!(eval("math.floor(2.7) + math.ceil(2.1)", &[]).unwrap(), 5.0);
        assert_eq!(eval("math.hypot(3, 4)", &[]).unwrap(), 5.0);
        assert!((eval("math.pi", &[]).unwrap() - std::f64::consts::PI).abs() < 1e-15);
        assert!((eval("math.log(math.e)", &[]).unwrap() - 1.0).abs() < 1e-12);
        assert!((eval("math.log(8, 2)", &[]).unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_round_with_extreme_places() {
        assert_eq!(eval("round(1.5, 400)", &[]).unwrap(), 1.5);
        assert_eq!(eval("round(1.25, 310)", &[]).unwrap(), 1.25);
        assert_eq!(eval("round(1.25, 300)", &[]).unwrap(), 1.25);
        assert_eq!(eval("round(1e300, 100)", &[]).unwrap(), 1e300);
        assert_eq!(eval("round(123, -400)", &[]).unwrap(), 0.0);
        assert!(eval("round(-123, -400)", &[]).unwrap().is_sign_negative());
        assert_eq!(eval("round(123, -5)", &[]).unwrap(), 0.0);
        assert_eq!(eval("round(150, -2)", &[]).unwrap(), 200.0);
    }

    #[test]
    fn test_non_finite_bindings_are_errors() {
        assert_eq!(eval("x", &[("x", f64::INFINITY)]).unwrap_err(), "numerical result out of range");
        assert!(eval("-x", &[("x", f64::INFINITY)]).is_err());
        assert!(eval("+x", &[("x", f64::NEG_INFINITY)]).is_err());
        assert_eq!(eval("x", &[("x", f64::NAN)]).unwrap_err(), "math domain error");
    }

    #[test]
    fn test_evaluate_errors() {
        assert_eq!(eval("x / 0", &[("x", 10.0)]).unwrap_err(), "division by zero");
        assert!(eval("x // 0", &[("x", 10.0)]).is_err());
        assert!(eval("x % 0", &[("x", 10.0)]).is_err());
        assert!(eval("0 ** -1", &[]).is_err());
        assert!(eval("math.sqrt(-1)", &[]).is_err());
        assert!(eval("math.log(0)", &[]).is_err());
        assert!(eval("(-8) ** 0.5", &[]).is_err());
        assert!(eval("10.0 ** 400", &[]).is_err());
        assert!(eval("math.exp(1000)", &[]).is_err());
        assert!(eval("abs(1, 2)", &[]).is_err());
        assert!(eval("min()", &[]).is_err());
        assert!(eval("open(1)", &[]).is_err());
        assert!(eval("math.system(1)", &[]).is_err());
    }

    #[test]
    fn test_function_registry() {
        let mut registry = FunctionRegistry::new();

        for name in ["abs", "round", "min", "max", "sum", "pow", "math.sqrt", "math.sin"] {
            assert!(registry.get_function(name).is_some(), "{name} should be registered");
        }
        assert_eq!(registry.get_constant("math.pi"), Some(std::f64::consts::PI));

        // Names are case-sensitive
        assert!(registry.get_function("ABS").is_none());
        assert!(registry.get_function("eval").is_none());
        assert!(registry.get_function("__import__").is_none());

        registry.register_function("double", |args| {
            expect_arity("double", args, 1)?;
            Ok(args[0] * 2.0)
        });
        let double_func = registry.get_function("double").unwrap();
        assert_eq!(double_func(&[5.0]).unwrap(), 10.0);
        assert!(registry.is_reserved("double"));
        assert!(!registry.is_reserved("hours"));
    }

    #[test]
    fn test_collect_variables() {
        let expr = Parser::new("a * b + max(a, c) + math.pi").unwrap().parse().unwrap();
        let mut names = Vec::new();
        expr.collect_variables(&mut names);
        assert_eq!(names, vec!["a", "b", "c", "math.pi"]);
    }
}
