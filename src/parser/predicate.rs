//! The predicate-expression compiler.
//!
//! A predicate arrives as three strings: the ordered formal parameters, the
//! matching actual constraint-scope tokens (variable names or integer
//! literals), and a prefix-functional expression such as
//! `eq(add(X0,X1),X2)`. Compilation is split into a pure parsing stage that
//! produces an [`Expr`] tree and a lowering stage that walks the tree,
//! constant-folds, introduces auxiliary variables with interval bounds
//! derived from the operand bounds, and emits propagators into a store.
//!
//! Lowering a subexpression yields a [`Lowered`] value: an integer, a
//! variable, a formula, or one of the boolean outcomes `True`/`False`
//! produced by relational short-circuiting. The connectives combine those
//! three-valued results before any propagator is built.

use tracing::debug;

use crate::{
    error::{Error, Result, SolverError},
    solver::{
        constraint::{Operand, Propagator},
        constraints::{
            arithmetic::{AbsEq, AddEq, DistanceEq, DivEq, MaxEq, MinEq, ModEq, MulEq, PowEq},
            formula::{Contradiction, Formula, FormulaConstraint, IfThenElse},
            relation::{Rel, RelOp},
        },
        domain::IntDomain,
        store::{Store, VarId},
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    LParen,
    RParen,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                let _ = chars.next();
            }
            '(' => {
                let _ = chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                let _ = chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                let _ = chars.next();
                tokens.push(Token::Comma);
            }
            '-' | '0'..='9' => {
                let mut literal = String::new();
                literal.push(chars.next().expect("peeked"));
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        literal.push(chars.next().expect("peeked"));
                    } else {
                        break;
                    }
                }
                let value = literal.parse::<i64>().map_err(|_| {
                    Error::from(SolverError::MalformedExpression(format!(
                        "bad integer literal `{}`",
                        literal
                    )))
                })?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '.' {
                        ident.push(chars.next().expect("peeked"));
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(SolverError::MalformedExpression(format!(
                    "unexpected character `{}`",
                    other
                ))
                .into())
            }
        }
    }
    Ok(tokens)
}

/// A parsed predicate expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Ident(String),
    Call(String, Vec<Expr>),
}

/// Parses a prefix-functional expression into an [`Expr`] tree, without
/// touching any store.
pub fn parse_expression(text: &str) -> Result<Expr> {
    let tokens = tokenize(text)?;
    let mut pos = 0;
    let expr = parse_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(SolverError::MalformedExpression(format!(
            "trailing tokens after expression in `{}`",
            text
        ))
        .into());
    }
    Ok(expr)
}

fn parse_expr(tokens: &[Token], pos: &mut usize) -> Result<Expr> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| SolverError::MalformedExpression("unexpected end of expression".into()))?;
    *pos += 1;
    match token {
        Token::Int(v) => Ok(Expr::Int(*v)),
        Token::Ident(name) => {
            if tokens.get(*pos) == Some(&Token::LParen) {
                *pos += 1;
                let mut args = Vec::new();
                loop {
                    args.push(parse_expr(tokens, pos)?);
                    match tokens.get(*pos) {
                        Some(Token::Comma) => *pos += 1,
                        Some(Token::RParen) => {
                            *pos += 1;
                            break;
                        }
                        _ => {
                            return Err(SolverError::MalformedExpression(format!(
                                "expected `,` or `)` in arguments of `{}`",
                                name
                            ))
                            .into())
                        }
                    }
                }
                Ok(Expr::Call(name.clone(), args))
            } else {
                Ok(Expr::Ident(name.clone()))
            }
        }
        other => Err(SolverError::MalformedExpression(format!(
            "unexpected token {:?}",
            other
        ))
        .into()),
    }
}

/// The lowering result of one subexpression.
#[derive(Debug)]
pub enum Lowered {
    Const(i64),
    Var(VarId),
    Formula(Formula),
    /// A non-reifiable propagator emitted by a specialized top-level form.
    Constraint(Box<dyn Propagator>),
    True,
    False,
}

/// The output of lowering a predicate: the emitted propagators, the
/// auxiliary variables they introduced, and the utility variable if the
/// predicate is soft.
#[derive(Debug)]
pub struct Lowering {
    pub constraints: Vec<Box<dyn Propagator>>,
    pub aux_vars: Vec<VarId>,
    pub util_var: Option<VarId>,
}

/// A declarative predicate constraint: re-lowered into each store it is
/// cloned into, so clones never share variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateDef {
    pub name: String,
    pub constraint_params: String,
    pub predicate_params: String,
    pub expression: String,
}

impl PredicateDef {
    pub fn new(
        name: impl Into<String>,
        constraint_params: impl Into<String>,
        predicate_params: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            constraint_params: constraint_params.into(),
            predicate_params: predicate_params.into(),
            expression: expression.into(),
        }
    }

    /// The name of this predicate's utility variable. Deterministic so that
    /// re-lowering in a cloned store resolves to the same variable.
    pub fn util_name(&self) -> String {
        format!("util_{}", self.name)
    }

    /// Builds the parameter substitution map: each formal parameter maps to
    /// a store variable or an integer constant.
    fn environment(&self, store: &Store) -> Result<Vec<(String, Operand)>> {
        let mut env = Vec::new();
        let mut actuals = self.constraint_params.split_whitespace();
        for formal in self.predicate_params.split_whitespace() {
            if formal == "int" {
                continue;
            }
            let actual = actuals.next().ok_or_else(|| {
                SolverError::MalformedExpression(format!(
                    "predicate `{}` has more formal than actual parameters",
                    self.name
                ))
            })?;
            let operand = match store.find_variable(actual) {
                Some(v) => Operand::Var(v),
                None => match actual.parse::<i64>() {
                    Ok(c) => Operand::Const(c),
                    Err(_) => return Err(SolverError::UnknownParameter(actual.to_owned()).into()),
                },
            };
            env.push((formal.to_owned(), operand));
        }
        Ok(env)
    }

    /// Compiles the predicate into propagators over `store`'s variables.
    pub fn lower(&self, store: &mut Store) -> Result<Lowering> {
        let env = self.environment(store)?;
        let expr = parse_expression(&self.expression)?;

        let mut ctx = LowerCtx {
            store,
            env: &env,
            constraints: Vec::new(),
            aux_vars: Vec::new(),
        };

        let top = ctx.lower_toplevel(&expr)?;

        let mut util_var = None;
        match top {
            Lowered::Formula(f) => ctx.constraints.push(Box::new(FormulaConstraint::new(f))),
            Lowered::Constraint(c) => ctx.constraints.push(c),
            Lowered::Var(v) => {
                let name = self.util_name();
                let dom = ctx.store.domain(v).clone();
                let util = ctx.store.find_or_create(&name, &dom);
                if util != v {
                    ctx.constraints.push(Box::new(FormulaConstraint::new(
                        Formula::Rel(Rel::new(Operand::Var(util), RelOp::Eq, Operand::Var(v))),
                    )));
                }
                util_var = Some(util);
            }
            Lowered::Const(c) => {
                let name = self.util_name();
                let util = ctx.store.find_or_create(&name, &IntDomain::singleton(c));
                util_var = Some(util);
            }
            Lowered::True => debug!(predicate = %self.name, "predicate is trivially satisfied"),
            Lowered::False => ctx.constraints.push(Box::new(Contradiction::new())),
        }

        Ok(Lowering {
            constraints: ctx.constraints,
            aux_vars: ctx.aux_vars,
            util_var,
        })
    }
}

struct LowerCtx<'a> {
    store: &'a mut Store,
    env: &'a [(String, Operand)],
    constraints: Vec<Box<dyn Propagator>>,
    aux_vars: Vec<VarId>,
}

impl LowerCtx<'_> {
    fn aux(&mut self, lo: i64, hi: i64) -> VarId {
        let name = self.store.fresh_name("aux");
        let id = self.store.new_variable(name, IntDomain::bounds(lo, hi));
        self.aux_vars.push(id);
        id
    }

    fn aux_with_domain(&mut self, dom: IntDomain) -> VarId {
        let name = self.store.fresh_name("aux");
        let id = self.store.new_variable(name, dom);
        self.aux_vars.push(id);
        id
    }

    fn bounds(&self, op: Operand) -> (i64, i64) {
        match op {
            Operand::Const(c) => (c, c),
            Operand::Var(v) => {
                let d = self.store.domain(v);
                (d.min().unwrap_or(i64::MAX), d.max().unwrap_or(i64::MIN))
            }
        }
    }

    fn op_domain(&self, op: Operand) -> IntDomain {
        match op {
            Operand::Const(c) => IntDomain::singleton(c),
            Operand::Var(v) => self.store.domain(v).clone(),
        }
    }

    fn as_operand(&self, lowered: Lowered, context: &str) -> Result<Operand> {
        match lowered {
            Lowered::Const(c) => Ok(Operand::Const(c)),
            Lowered::Var(v) => Ok(Operand::Var(v)),
            other => Err(SolverError::MalformedExpression(format!(
                "expected an integer operand in `{}`, found {:?}",
                context, other
            ))
            .into()),
        }
    }

    fn lower_operand(&mut self, expr: &Expr) -> Result<Operand> {
        let lowered = self.lower(expr)?;
        self.as_operand(lowered, "arithmetic expression")
    }

    /// The top level gets the specialized forms that skip the auxiliary
    /// variable, e.g. `eq(add(x,y),z)` lowering to the ternary sum
    /// propagator directly.
    fn lower_toplevel(&mut self, expr: &Expr) -> Result<Lowered> {
        if let Expr::Call(op, args) = expr {
            if op == "eq" && args.len() == 2 {
                if let Expr::Call(inner, inner_args) = &args[0] {
                    match (inner.as_str(), inner_args.len()) {
                        ("add", 2) => {
                            let a = self.lower_operand(&inner_args[0])?;
                            let b = self.lower_operand(&inner_args[1])?;
                            let c = self.lower_operand(&args[1])?;
                            if let (Operand::Const(x), Operand::Const(y), Operand::Const(z)) =
                                (a, b, c)
                            {
                                return Ok(if x + y == z { Lowered::True } else { Lowered::False });
                            }
                            return Ok(Lowered::Constraint(Box::new(AddEq::new(a, b, c))));
                        }
                        ("mul", 2) => {
                            let a = self.lower_operand(&inner_args[0])?;
                            let b = self.lower_operand(&inner_args[1])?;
                            let c = self.lower_operand(&args[1])?;
                            if let (Operand::Const(x), Operand::Const(y), Operand::Const(z)) =
                                (a, b, c)
                            {
                                return Ok(if x * y == z { Lowered::True } else { Lowered::False });
                            }
                            return Ok(Lowered::Constraint(Box::new(MulEq::new(a, b, c))));
                        }
                        _ => {}
                    }
                }
            }
        }
        self.lower(expr)
    }

    fn lower(&mut self, expr: &Expr) -> Result<Lowered> {
        match expr {
            Expr::Int(v) => Ok(Lowered::Const(*v)),
            Expr::Ident(name) => {
                for (formal, operand) in self.env {
                    if formal == name {
                        return Ok(match operand {
                            Operand::Var(v) => Lowered::Var(*v),
                            Operand::Const(c) => Lowered::Const(*c),
                        });
                    }
                }
                Err(SolverError::UnknownToken(name.clone()).into())
            }
            Expr::Call(op, args) => self.lower_call(op, args),
        }
    }

    fn expect_arity(&self, op: &str, args: &[Expr], arity: usize) -> Result<()> {
        if args.len() != arity {
            return Err(SolverError::MalformedExpression(format!(
                "`{}` takes {} arguments, got {}",
                op,
                arity,
                args.len()
            ))
            .into());
        }
        Ok(())
    }

    fn lower_call(&mut self, op: &str, args: &[Expr]) -> Result<Lowered> {
        match op {
            "abs" => {
                self.expect_arity(op, args, 1)?;
                // |a - b| gets the dedicated distance propagator.
                if let Expr::Call(inner, inner_args) = &args[0] {
                    if inner == "sub" && inner_args.len() == 2 {
                        let a = self.lower_operand(&inner_args[0])?;
                        let b = self.lower_operand(&inner_args[1])?;
                        if let (Operand::Const(x), Operand::Const(y)) = (a, b) {
                            return Ok(Lowered::Const((x - y).abs()));
                        }
                        let (al, ah) = self.bounds(a);
                        let (bl, bh) = self.bounds(b);
                        let lo = 0.max(al.saturating_sub(bh)).max(bl.saturating_sub(ah));
                        let hi = al
                            .saturating_sub(bh)
                            .abs()
                            .max(ah.saturating_sub(bl).abs());
                        let aux = self.aux(lo, hi);
                        self.constraints
                            .push(Box::new(DistanceEq::new(a, b, Operand::Var(aux))));
                        return Ok(Lowered::Var(aux));
                    }
                }
                let a = self.lower_operand(&args[0])?;
                match a {
                    Operand::Const(c) => Ok(Lowered::Const(c.abs())),
                    Operand::Var(v) => {
                        let (lo, hi) = self.bounds(a);
                        if lo >= 0 {
                            return Ok(Lowered::Var(v));
                        }
                        let aux = if hi <= 0 {
                            self.aux(-hi, -lo)
                        } else {
                            self.aux(0, lo.abs().max(hi.abs()))
                        };
                        self.constraints
                            .push(Box::new(AbsEq::new(a, Operand::Var(aux))));
                        Ok(Lowered::Var(aux))
                    }
                }
            }
            "neg" => {
                self.expect_arity(op, args, 1)?;
                let a = self.lower_operand(&args[0])?;
                match a {
                    Operand::Const(c) => Ok(Lowered::Const(-c)),
                    Operand::Var(_) => {
                        let (lo, hi) = self.bounds(a);
                        let aux = self.aux(hi.saturating_neg(), lo.saturating_neg());
                        self.constraints.push(Box::new(MulEq::new(
                            a,
                            Operand::Const(-1),
                            Operand::Var(aux),
                        )));
                        Ok(Lowered::Var(aux))
                    }
                }
            }
            "add" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_operand(&args[0])?;
                let b = self.lower_operand(&args[1])?;
                match (a, b) {
                    (Operand::Const(x), Operand::Const(y)) => Ok(Lowered::Const(x + y)),
                    (Operand::Var(v), Operand::Const(0)) | (Operand::Const(0), Operand::Var(v)) => {
                        Ok(Lowered::Var(v))
                    }
                    _ => {
                        let (al, ah) = self.bounds(a);
                        let (bl, bh) = self.bounds(b);
                        let aux = self.aux(al.saturating_add(bl), ah.saturating_add(bh));
                        self.constraints
                            .push(Box::new(AddEq::new(a, b, Operand::Var(aux))));
                        Ok(Lowered::Var(aux))
                    }
                }
            }
            "sub" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_operand(&args[0])?;
                let b = self.lower_operand(&args[1])?;
                match (a, b) {
                    (Operand::Const(x), Operand::Const(y)) => Ok(Lowered::Const(x - y)),
                    (Operand::Var(v), Operand::Const(0)) => Ok(Lowered::Var(v)),
                    _ => {
                        let (al, ah) = self.bounds(a);
                        let (bl, bh) = self.bounds(b);
                        let aux = self.aux(al.saturating_sub(bh), ah.saturating_sub(bl));
                        // b + aux = a
                        self.constraints
                            .push(Box::new(AddEq::new(b, Operand::Var(aux), a)));
                        Ok(Lowered::Var(aux))
                    }
                }
            }
            "mul" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_operand(&args[0])?;
                let b = self.lower_operand(&args[1])?;
                match (a, b) {
                    (Operand::Const(x), Operand::Const(y)) => Ok(Lowered::Const(x * y)),
                    (Operand::Var(v), Operand::Const(1)) | (Operand::Const(1), Operand::Var(v)) => {
                        Ok(Lowered::Var(v))
                    }
                    _ => {
                        let (al, ah) = self.bounds(a);
                        let (bl, bh) = self.bounds(b);
                        let corners = [
                            al.saturating_mul(bl),
                            al.saturating_mul(bh),
                            ah.saturating_mul(bl),
                            ah.saturating_mul(bh),
                        ];
                        let lo = *corners.iter().min().expect("corners is non-empty");
                        let hi = *corners.iter().max().expect("corners is non-empty");
                        let aux = self.aux(lo, hi);
                        self.constraints
                            .push(Box::new(MulEq::new(a, b, Operand::Var(aux))));
                        Ok(Lowered::Var(aux))
                    }
                }
            }
            "div" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_operand(&args[0])?;
                let b = self.lower_operand(&args[1])?;
                match (a, b) {
                    (Operand::Const(x), Operand::Const(y)) => {
                        if y == 0 {
                            Err(SolverError::MalformedExpression(
                                "constant division by zero".into(),
                            )
                            .into())
                        } else {
                            Ok(Lowered::Const(x / y))
                        }
                    }
                    (Operand::Var(v), Operand::Const(1)) => Ok(Lowered::Var(v)),
                    _ => {
                        let (bl, bh) = self.divisor_bounds(b)?;
                        let (al, ah) = self.bounds(a);
                        let corners = [al / bl, al / bh, ah / bl, ah / bh];
                        let lo = *corners.iter().min().expect("corners is non-empty");
                        let hi = *corners.iter().max().expect("corners is non-empty");
                        let aux = self.aux(lo, hi);
                        self.constraints
                            .push(Box::new(DivEq::new(a, b, Operand::Var(aux))));
                        Ok(Lowered::Var(aux))
                    }
                }
            }
            "mod" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_operand(&args[0])?;
                let b = self.lower_operand(&args[1])?;
                match (a, b) {
                    (Operand::Const(x), Operand::Const(y)) => {
                        if y == 0 {
                            Err(SolverError::MalformedExpression(
                                "constant modulo by zero".into(),
                            )
                            .into())
                        } else {
                            Ok(Lowered::Const(x % y))
                        }
                    }
                    _ => {
                        let (bl, bh) = self.divisor_bounds(b)?;
                        let (al, ah) = self.bounds(a);
                        // a mod b == a whenever 0 <= a < min(b)
                        if al >= 0 && bl > 0 && ah < bl {
                            return Ok(match a {
                                Operand::Var(v) => Lowered::Var(v),
                                Operand::Const(c) => Lowered::Const(c),
                            });
                        }
                        let m = bl.abs().max(bh.abs());
                        let lo = if al >= 0 { 0 } else { -(m - 1) };
                        let hi = if ah <= 0 { 0 } else { m - 1 };
                        let aux = self.aux(lo, hi);
                        self.constraints
                            .push(Box::new(ModEq::new(a, b, Operand::Var(aux))));
                        Ok(Lowered::Var(aux))
                    }
                }
            }
            "pow" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_operand(&args[0])?;
                let b = self.lower_operand(&args[1])?;
                let (al, ah) = self.bounds(a);
                let (bl, bh) = self.bounds(b);
                if let (Operand::Const(x), Operand::Const(y)) = (a, b) {
                    if y >= 0 {
                        return Ok(Lowered::Const(sat_pow(x, y)));
                    }
                }
                let max_exp = bl.abs().max(bh.abs());
                let aux = if al >= 0 {
                    self.aux(0, sat_pow(ah, max_exp))
                } else {
                    let m = sat_pow(al.abs().max(ah.abs()), max_exp);
                    self.aux(m.saturating_neg(), m)
                };
                self.constraints
                    .push(Box::new(PowEq::new(a, b, Operand::Var(aux))));
                Ok(Lowered::Var(aux))
            }
            "min" | "max" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_operand(&args[0])?;
                let b = self.lower_operand(&args[1])?;
                let (al, ah) = self.bounds(a);
                let (bl, bh) = self.bounds(b);
                if op == "min" {
                    if let (Operand::Const(x), Operand::Const(y)) = (a, b) {
                        return Ok(Lowered::Const(x.min(y)));
                    }
                    // dominance: one operand is always the smaller
                    if ah <= bl {
                        return Ok(operand_to_lowered(a));
                    }
                    if bh <= al {
                        return Ok(operand_to_lowered(b));
                    }
                    let aux = self.aux(al.min(bl), ah.min(bh));
                    self.constraints
                        .push(Box::new(MinEq::new(vec![a, b], Operand::Var(aux))));
                    Ok(Lowered::Var(aux))
                } else {
                    if let (Operand::Const(x), Operand::Const(y)) = (a, b) {
                        return Ok(Lowered::Const(x.max(y)));
                    }
                    if al >= bh {
                        return Ok(operand_to_lowered(a));
                    }
                    if bl >= ah {
                        return Ok(operand_to_lowered(b));
                    }
                    let aux = self.aux(al.max(bl), ah.max(bh));
                    self.constraints
                        .push(Box::new(MaxEq::new(vec![a, b], Operand::Var(aux))));
                    Ok(Lowered::Var(aux))
                }
            }
            "if" => {
                self.expect_arity(op, args, 3)?;
                let cond = self.lower(&args[0])?;
                match cond {
                    Lowered::True => self.lower(&args[1]),
                    Lowered::False => self.lower(&args[2]),
                    Lowered::Formula(cond) => {
                        let then_op = self.lower_operand(&args[1])?;
                        let else_op = self.lower_operand(&args[2])?;
                        let dom = self.op_domain(then_op).union(&self.op_domain(else_op));
                        let aux = self.aux_with_domain(dom);
                        self.constraints.push(Box::new(IfThenElse::new(
                            cond,
                            Formula::Rel(Rel::new(Operand::Var(aux), RelOp::Eq, then_op)),
                            Formula::Rel(Rel::new(Operand::Var(aux), RelOp::Eq, else_op)),
                        )));
                        Ok(Lowered::Var(aux))
                    }
                    other => Err(SolverError::MalformedExpression(format!(
                        "`if` condition must be boolean, found {:?}",
                        other
                    ))
                    .into()),
                }
            }
            "eq" | "ne" | "ge" | "gt" | "le" | "lt" => {
                self.expect_arity(op, args, 2)?;
                let rel_op = match op {
                    "eq" => RelOp::Eq,
                    "ne" => RelOp::Ne,
                    "ge" => RelOp::Ge,
                    "gt" => RelOp::Gt,
                    "le" => RelOp::Le,
                    _ => RelOp::Lt,
                };
                let a = self.lower_operand(&args[0])?;
                let b = self.lower_operand(&args[1])?;
                let rel = Rel::new(a, rel_op, b);
                // Short-circuit when the bounds already decide the outcome.
                match rel.truth_in(self.store) {
                    Some(true) => Ok(Lowered::True),
                    Some(false) => Ok(Lowered::False),
                    None => Ok(Lowered::Formula(Formula::Rel(rel))),
                }
            }
            "not" => {
                self.expect_arity(op, args, 1)?;
                match self.lower_bool(&args[0], op)? {
                    Lowered::True => Ok(Lowered::False),
                    Lowered::False => Ok(Lowered::True),
                    Lowered::Formula(f) => Ok(Lowered::Formula(Formula::Not(Box::new(f)))),
                    _ => unreachable!("lower_bool returns booleans only"),
                }
            }
            "and" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_bool(&args[0], op)?;
                let b = self.lower_bool(&args[1], op)?;
                Ok(match (a, b) {
                    (Lowered::False, _) | (_, Lowered::False) => Lowered::False,
                    (Lowered::True, other) | (other, Lowered::True) => other,
                    (Lowered::Formula(fa), Lowered::Formula(fb)) => {
                        Lowered::Formula(Formula::And(Box::new(fa), Box::new(fb)))
                    }
                    _ => unreachable!("lower_bool returns booleans only"),
                })
            }
            "or" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_bool(&args[0], op)?;
                let b = self.lower_bool(&args[1], op)?;
                Ok(match (a, b) {
                    (Lowered::True, _) | (_, Lowered::True) => Lowered::True,
                    (Lowered::False, other) | (other, Lowered::False) => other,
                    (Lowered::Formula(fa), Lowered::Formula(fb)) => {
                        Lowered::Formula(Formula::Or(Box::new(fa), Box::new(fb)))
                    }
                    _ => unreachable!("lower_bool returns booleans only"),
                })
            }
            "xor" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_bool(&args[0], op)?;
                let b = self.lower_bool(&args[1], op)?;
                Ok(match (a, b) {
                    (Lowered::True, Lowered::True) | (Lowered::False, Lowered::False) => {
                        Lowered::False
                    }
                    (Lowered::True, Lowered::False) | (Lowered::False, Lowered::True) => {
                        Lowered::True
                    }
                    (Lowered::True, Lowered::Formula(f)) | (Lowered::Formula(f), Lowered::True) => {
                        Lowered::Formula(Formula::Not(Box::new(f)))
                    }
                    (Lowered::False, Lowered::Formula(f))
                    | (Lowered::Formula(f), Lowered::False) => Lowered::Formula(f),
                    (Lowered::Formula(fa), Lowered::Formula(fb)) => {
                        Lowered::Formula(Formula::Xor(Box::new(fa), Box::new(fb)))
                    }
                    _ => unreachable!("lower_bool returns booleans only"),
                })
            }
            "iff" => {
                self.expect_arity(op, args, 2)?;
                let a = self.lower_bool(&args[0], op)?;
                let b = self.lower_bool(&args[1], op)?;
                Ok(match (a, b) {
                    (Lowered::True, Lowered::True) | (Lowered::False, Lowered::False) => {
                        Lowered::True
                    }
                    (Lowered::True, Lowered::False) | (Lowered::False, Lowered::True) => {
                        Lowered::False
                    }
                    (Lowered::True, Lowered::Formula(f)) | (Lowered::Formula(f), Lowered::True) => {
                        Lowered::Formula(f)
                    }
                    (Lowered::False, Lowered::Formula(f))
                    | (Lowered::Formula(f), Lowered::False) => {
                        Lowered::Formula(Formula::Not(Box::new(f)))
                    }
                    (Lowered::Formula(fa), Lowered::Formula(fb)) => {
                        Lowered::Formula(Formula::Iff(Box::new(fa), Box::new(fb)))
                    }
                    _ => unreachable!("lower_bool returns booleans only"),
                })
            }
            unknown => Err(SolverError::UnknownToken(unknown.to_owned()).into()),
        }
    }

    /// Lowers an argument that must be boolean-valued.
    fn lower_bool(&mut self, expr: &Expr, context: &str) -> Result<Lowered> {
        match self.lower(expr)? {
            l @ (Lowered::True | Lowered::False | Lowered::Formula(_)) => Ok(l),
            other => Err(SolverError::MalformedExpression(format!(
                "`{}` expects boolean arguments, found {:?}",
                context, other
            ))
            .into()),
        }
    }

    /// The divisor's bounds with 0 carved out of its baseline domain.
    fn divisor_bounds(&mut self, b: Operand) -> Result<(i64, i64)> {
        match b {
            Operand::Const(0) => {
                Err(SolverError::MalformedExpression("division by zero".into()).into())
            }
            Operand::Const(c) => Ok((c, c)),
            Operand::Var(v) => {
                let dom = self.store.domain(v).without(0);
                self.store.set_domain(v, dom.clone());
                let lo = dom.min().unwrap_or(1);
                let hi = dom.max().unwrap_or(-1);
                Ok((if lo == 0 { 1 } else { lo }, if hi == 0 { -1 } else { hi }))
            }
        }
    }
}

fn operand_to_lowered(op: Operand) -> Lowered {
    match op {
        Operand::Var(v) => Lowered::Var(v),
        Operand::Const(c) => Lowered::Const(c),
    }
}

fn sat_pow(base: i64, exp: i64) -> i64 {
    let mut result: i64 = 1;
    for _ in 0..exp.max(0) {
        result = result.saturating_mul(base);
        if result == 0 || result == i64::MAX || result == i64::MIN {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn store_with_vars(names: &[&str], lo: i64, hi: i64) -> Store {
        let mut store = Store::new();
        for name in names {
            let _ = store.new_variable(*name, IntDomain::bounds(lo, hi));
        }
        store
    }

    fn impose_all(store: &mut Store, lowering: Lowering) {
        for c in lowering.constraints {
            let _ = store.impose(c);
        }
    }

    #[test]
    fn parses_nested_calls() {
        let expr = parse_expression("eq(add(X0,X1),X2)").unwrap();
        assert_eq!(
            expr,
            Expr::Call(
                "eq".into(),
                vec![
                    Expr::Call("add".into(), vec![Expr::Ident("X0".into()), Expr::Ident("X1".into())]),
                    Expr::Ident("X2".into()),
                ]
            )
        );
    }

    #[test]
    fn parses_negative_literals() {
        let expr = parse_expression("add(x,-3)").unwrap();
        assert_eq!(
            expr,
            Expr::Call("add".into(), vec![Expr::Ident("x".into()), Expr::Int(-3)])
        );
    }

    #[test]
    fn sum_predicate_accepts_exactly_the_matching_tuples() {
        let mut store = store_with_vars(&["x", "y", "z"], 0, 2);
        let def = PredicateDef::new("c0", "x y z", "int X0 int X1 int X2", "eq(add(X0,X1),X2)");
        let lowering = def.lower(&mut store).unwrap();
        assert!(lowering.util_var.is_none());
        impose_all(&mut store, lowering);

        let (x, y, z) = (
            store.find_variable("x").expect("x exists"),
            store.find_variable("y").expect("y exists"),
            store.find_variable("z").expect("z exists"),
        );

        let mut feasible = 0;
        for a in 0..=2 {
            for b in 0..=2 {
                for c in 0..=2 {
                    let lvl = store.new_level();
                    let ok = store.ground(x, a).is_ok()
                        && store.ground(y, b).is_ok()
                        && store.ground(z, c).is_ok()
                        && store.consistency();
                    store.remove_level(lvl);
                    store.set_level(lvl - 1);
                    assert_eq!(ok, a + b == c, "tuple ({}, {}, {})", a, b, c);
                    if ok {
                        feasible += 1;
                    }
                }
            }
        }
        assert_eq!(feasible, 9);
    }

    #[test]
    fn constant_expression_becomes_a_fixed_utility() {
        let mut store = Store::new();
        let def = PredicateDef::new("c1", "", "", "add(2,3)");
        let lowering = def.lower(&mut store).unwrap();
        let util = lowering.util_var.expect("soft constraint");
        assert_eq!(store.domain(util).singleton_value(), Some(5));
    }

    #[test]
    fn soft_predicate_exposes_a_utility_variable() {
        let mut store = store_with_vars(&["x", "y"], 0, 3);
        let def = PredicateDef::new("c2", "x y", "int X0 int X1", "mul(X0,X1)");
        let lowering = def.lower(&mut store).unwrap();
        let util = lowering.util_var.expect("soft constraint");
        assert_eq!(store.name(util), "util_c2");
        assert_eq!(store.domain(util).min(), Some(0));
        assert_eq!(store.domain(util).max(), Some(9));
    }

    #[test]
    fn entailed_relation_folds_to_true() {
        let mut store = store_with_vars(&["x"], 0, 3);
        let def = PredicateDef::new("c3", "x", "int X0", "ge(X0,0)");
        let lowering = def.lower(&mut store).unwrap();
        assert!(lowering.constraints.is_empty());
        assert!(lowering.util_var.is_none());
    }

    #[test]
    fn contradicted_relation_imposes_a_contradiction() {
        let mut store = store_with_vars(&["x"], 0, 3);
        let def = PredicateDef::new("c4", "x", "int X0", "gt(X0,9)");
        let lowering = def.lower(&mut store).unwrap();
        assert_eq!(lowering.constraints.len(), 1);
        assert_eq!(lowering.constraints[0].descriptor().name, "Contradiction");
    }

    #[test]
    fn unknown_operator_is_a_hard_error() {
        let mut store = store_with_vars(&["x"], 0, 3);
        let def = PredicateDef::new("c5", "x", "int X0", "frobnicate(X0)");
        let err = def.lower(&mut store).unwrap_err();
        assert!(matches!(err.inner(), SolverError::UnknownToken(t) if t == "frobnicate"));
    }

    #[test]
    fn unresolvable_parameter_is_reported_with_its_token() {
        let mut store = Store::new();
        let def = PredicateDef::new("c6", "nosuchvar", "int X0", "eq(X0,1)");
        let err = def.lower(&mut store).unwrap_err();
        assert!(matches!(err.inner(), SolverError::UnknownParameter(t) if t == "nosuchvar"));
    }

    #[test]
    fn if_builds_a_union_domain_auxiliary() {
        let mut store = Store::new();
        let _ = store.new_variable("x", IntDomain::bounds(0, 1));
        let def = PredicateDef::new("c7", "x", "int X0", "if(eq(X0,1),10,20)");
        let lowering = def.lower(&mut store).unwrap();
        let util = lowering.util_var.expect("soft constraint");
        assert_eq!(store.domain(util).values(), vec![10, 20]);
        impose_all(&mut store, lowering);

        let x = store.find_variable("x").expect("x exists");
        let lvl = store.new_level();
        store.ground(x, 1).unwrap();
        assert!(store.consistency());
        assert_eq!(store.domain(util).singleton_value(), Some(10));
        store.remove_level(lvl);
        store.set_level(lvl - 1);
    }

    #[test]
    fn boolean_connectives_simplify_against_constants() {
        let mut store = store_with_vars(&["x"], 0, 3);
        // lt(0,1) folds to true, so the disjunction is trivially satisfied.
        let def = PredicateDef::new("c8", "x", "int X0", "or(lt(0,1),eq(X0,2))");
        let lowering = def.lower(&mut store).unwrap();
        assert!(lowering.constraints.is_empty());
    }

    #[test]
    fn lowering_twice_yields_equivalent_constraint_sets() {
        let mut store_a = store_with_vars(&["x", "y", "z"], 0, 2);
        let mut store_b = store_with_vars(&["x", "y", "z"], 0, 2);
        let def = PredicateDef::new("c9", "x y z", "int X0 int X1 int X2", "eq(add(X0,X1),X2)");
        let la = def.lower(&mut store_a).unwrap();
        let lb = def.lower(&mut store_b).unwrap();
        assert_eq!(la.constraints.len(), lb.constraints.len());
        assert_eq!(la.aux_vars.len(), lb.aux_vars.len());
    }
}
