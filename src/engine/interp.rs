//! Reference engine interpreter
//!
//! A recursive-descent parser and AST evaluator over the script subset
//! the lexer accepts. The interpreter owns the global scope; everything
//! else lives in reference-counted heap cells.
//!
//! Native callbacks are dispatched with no interior borrows held, so a
//! callback is free to call back into the engine (container operations,
//! nested `minijs_run`) while a script is executing.

use std::cell::RefCell;
use std::ffi::CString;
use std::os::raw::{c_int, c_void};

use crate::abi::{MINIJS_CLASS, MINIJS_FUNCTION, MINIJS_OBJECT, MjsValue};
use crate::engine::heap::{Body, CellRef, NativeFunction, ObjectBody, Slot, new_cell};
use crate::engine::lexer::{Lexer, Token};

// ---------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    Assign(String, Box<Expr>),
    New(String, Vec<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    Member(Box<Expr>, String),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug)]
enum Stmt {
    Var(String, Expr),
    Expr(Expr),
}

// ---------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String, String> {
        match self.bump() {
            Token::Ident(name) => Ok(name),
            other => Err(format!("expected identifier, found {:?}", other)),
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        let found = self.bump();
        if found == token {
            Ok(())
        } else {
            Err(format!("expected {:?}, found {:?}", token, found))
        }
    }

    fn parse_program(mut self) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        while *self.peek() != Token::Eof {
            if self.eat(&Token::Semicolon) {
                continue;
            }
            stmts.push(self.statement()?);
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, String> {
        if self.eat(&Token::Var) {
            let name = self.expect_ident()?;
            let init = if self.eat(&Token::Eq) {
                self.expression()?
            } else {
                Expr::Null
            };
            self.eat(&Token::Semicolon);
            Ok(Stmt::Var(name, init))
        } else {
            let expr = self.expression()?;
            self.eat(&Token::Semicolon);
            Ok(Stmt::Expr(expr))
        }
    }

    fn expression(&mut self) -> Result<Expr, String> {
        // name = expr  (plain identifier targets only)
        if let (Token::Ident(_), Token::Eq) = (self.peek(), self.peek_at(1)) {
            let name = self.expect_ident()?;
            self.expect(Token::Eq)?;
            let rhs = self.expression()?;
            return Ok(Expr::Assign(name, Box::new(rhs)));
        }
        self.equality()
    }

    fn equality(&mut self) -> Result<Expr, String> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::BangEq => BinOp::NotEq,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn relational(&mut self) -> Result<Expr, String> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::LtEq => BinOp::LtEq,
                Token::Gt => BinOp::Gt,
                Token::GtEq => BinOp::GtEq,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Minus) {
            Ok(Expr::Neg(Box::new(self.unary()?)))
        } else if self.eat(&Token::Bang) {
            Ok(Expr::Not(Box::new(self.unary()?)))
        } else {
            self.postfix()
        }
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = self.expect_ident()?;
                if *self.peek() == Token::LParen {
                    let args = self.arguments()?;
                    expr = Expr::MethodCall(Box::new(expr), name, args);
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if *self.peek() == Token::LParen {
                let args = self.arguments()?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, String> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok(args);
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Null => Ok(Expr::Null),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::New => {
                let class = self.expect_ident()?;
                let args = self.arguments()?;
                Ok(Expr::New(class, args))
            }
            Token::LParen => {
                let expr = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            other => Err(format!("unexpected token {:?}", other)),
        }
    }
}

// ---------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------

/// One engine instance: the global scope plus evaluation machinery.
pub(crate) struct Interp {
    globals: RefCell<Vec<(String, Slot)>>,
}

type Locals = Vec<(String, Slot)>;

impl Interp {
    pub(crate) fn new() -> Self {
        Interp {
            globals: RefCell::new(Vec::new()),
        }
    }

    /// Install or replace a global. The slot's count moves into scope.
    pub(crate) fn set_global(&self, name: &str, slot: Slot) {
        let old;
        {
            let mut globals = self.globals.borrow_mut();
            if let Some(entry) = globals.iter_mut().find(|(n, _)| n == name) {
                old = Some(std::mem::replace(&mut entry.1, slot));
            } else {
                globals.push((name.to_owned(), slot));
                old = None;
            }
        }
        // Old value released only after the borrow is gone; its drop may
        // cascade back into the heap.
        drop(old);
    }

    fn get_global(&self, name: &str) -> Option<Slot> {
        self.globals
            .borrow()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, slot)| slot.clone())
    }

    /// Execute source text, rendering the final statement value as text.
    /// Never fails across the ABI: problems come back as `"Error: ..."`.
    pub(crate) fn run(&self, source: &str) -> String {
        match self.run_inner(source) {
            Ok(text) => text,
            Err(msg) => format!("Error: {}", msg),
        }
    }

    fn run_inner(&self, source: &str) -> Result<String, String> {
        let tokens = Lexer::new(source).tokenize()?;
        let stmts = Parser::new(tokens).parse_program()?;
        let mut locals: Locals = Vec::new();
        let mut last = Slot::Null;
        for stmt in &stmts {
            last = self.eval_stmt(stmt, &mut locals)?;
        }
        Ok(display_slot(&last))
    }

    fn eval_stmt(&self, stmt: &Stmt, locals: &mut Locals) -> Result<Slot, String> {
        match stmt {
            Stmt::Var(name, init) => {
                let value = self.eval_expr(init, locals)?;
                if let Some(entry) = locals.iter_mut().find(|(n, _)| n == name) {
                    entry.1 = value;
                } else {
                    locals.push((name.clone(), value));
                }
                Ok(Slot::Null)
            }
            Stmt::Expr(expr) => self.eval_expr(expr, locals),
        }
    }

    fn eval_expr(&self, expr: &Expr, locals: &mut Locals) -> Result<Slot, String> {
        match expr {
            Expr::Number(n) => Ok(Slot::Number(*n)),
            Expr::Str(s) => Ok(Slot::Str(s.clone())),
            Expr::Bool(b) => Ok(Slot::Bool(*b)),
            Expr::Null => Ok(Slot::Null),

            Expr::Ident(name) => locals
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, slot)| slot.clone())
                .or_else(|| self.get_global(name))
                .ok_or_else(|| format!("'{}' is not defined", name)),

            Expr::Assign(name, rhs) => {
                let value = self.eval_expr(rhs, locals)?;
                if let Some(entry) = locals.iter_mut().find(|(n, _)| n == name) {
                    entry.1 = value.clone();
                } else {
                    self.set_global(name, value.clone());
                }
                Ok(value)
            }

            Expr::Member(target, name) => {
                let object = self.eval_expr(target, locals)?;
                member_get(&object, name)
            }

            Expr::New(class_name, args) => {
                let class = self
                    .get_global(class_name)
                    .ok_or_else(|| format!("'{}' is not defined", class_name))?;
                let class_ref = match &class {
                    Slot::Handle(tag, cell) if *tag == MINIJS_CLASS => cell.clone(),
                    _ => return Err(format!("'{}' is not a class", class_name)),
                };

                let instance = CellRef::adopt(new_cell(Body::Object(ObjectBody {
                    props: Vec::new(),
                    class: Some(class_ref.clone()),
                })));
                let this = Slot::Handle(MINIJS_OBJECT, instance.clone());

                let ctor = find_class_method(&class_ref, "constructor");
                if let Some(ctor) = ctor {
                    let argv = self.eval_args(args, locals)?;
                    // Constructor return value is discarded.
                    call_native(&ctor, argv, Some(&this))?;
                }
                Ok(this)
            }

            Expr::Call(callee, args) => {
                let target = self.eval_expr(callee, locals)?;
                let function = match &target {
                    Slot::Handle(tag, cell) if *tag == MINIJS_FUNCTION => cell.clone(),
                    _ => return Err("value is not callable".to_string()),
                };
                let argv = self.eval_args(args, locals)?;
                call_native(&function, argv, None)
            }

            Expr::MethodCall(target, name, args) => {
                let object = self.eval_expr(target, locals)?;
                let receiver = match &object {
                    Slot::Handle(tag, cell) if *tag == MINIJS_OBJECT => cell.clone(),
                    _ => return Err(format!("cannot call '{}' on a non-object", name)),
                };
                let method = resolve_method(&receiver, name)
                    .ok_or_else(|| format!("'{}' is not a method", name))?;
                let argv = self.eval_args(args, locals)?;
                call_native(&method, argv, Some(&object))
            }

            Expr::Neg(inner) => {
                let v = self.eval_expr(inner, locals)?;
                Ok(Slot::Number(-to_number(&v)?))
            }
            Expr::Not(inner) => {
                let v = self.eval_expr(inner, locals)?;
                Ok(Slot::Bool(!truthy(&v)))
            }

            Expr::Binary(op, lhs, rhs) => {
                let a = self.eval_expr(lhs, locals)?;
                let b = self.eval_expr(rhs, locals)?;
                eval_binary(*op, &a, &b)
            }
        }
    }

    fn eval_args(&self, args: &[Expr], locals: &mut Locals) -> Result<Vec<Slot>, String> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.eval_expr(arg, locals)?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------
// Runtime helpers
// ---------------------------------------------------------------------

fn member_get(object: &Slot, name: &str) -> Result<Slot, String> {
    match object {
        Slot::Handle(tag, cell) if *tag == MINIJS_OBJECT => {
            let body = cell.cell().body.borrow();
            match &*body {
                Body::Object(ob) => Ok(ob
                    .props
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, slot)| slot.clone())
                    .unwrap_or(Slot::Null)),
                _ => Ok(Slot::Null),
            }
        }
        _ => Err(format!("cannot read property '{}' of a non-object", name)),
    }
}

fn find_class_method(class: &CellRef, name: &str) -> Option<CellRef> {
    let body = class.cell().body.borrow();
    match &*body {
        Body::Class(cb) => cb
            .methods
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, m)| m.clone()),
        _ => None,
    }
}

/// Own function-valued property first, then the class's method table.
fn resolve_method(object: &CellRef, name: &str) -> Option<CellRef> {
    let class;
    {
        let body = object.cell().body.borrow();
        let ob = match &*body {
            Body::Object(ob) => ob,
            _ => return None,
        };
        if let Some(found) = ob.props.iter().find_map(|(k, slot)| match slot {
            Slot::Handle(tag, cell) if k == name && *tag == MINIJS_FUNCTION => Some(cell.clone()),
            _ => None,
        }) {
            return Some(found);
        }
        class = ob.class.clone();
    }
    class.and_then(|c| find_class_method(&c, name))
}

/// Invoke a native function cell.
///
/// Arguments and `this` cross the ABI as borrowed wire structs; the
/// return struct is consumed. All interior borrows end before the
/// callback runs.
pub(crate) fn call_native(
    function: &CellRef,
    args: Vec<Slot>,
    this: Option<&Slot>,
) -> Result<Slot, String> {
    let native: NativeFunction = {
        let body = function.cell().body.borrow();
        match &*body {
            Body::Function(nf) => *nf,
            _ => return Err("value is not callable".to_string()),
        }
    };

    // Keep string payloads alive for the duration of the call.
    let mut text_guards: Vec<CString> = Vec::new();
    let mut argv: Vec<MjsValue> = Vec::with_capacity(args.len());
    for slot in &args {
        argv.push(slot_to_borrowed_arg(slot, &mut text_guards)?);
    }
    let this_nv = match this {
        Some(slot) => Some(slot_to_borrowed_arg(slot, &mut text_guards)?),
        None => None,
    };
    let this_ptr = this_nv
        .as_ref()
        .map_or(std::ptr::null(), |nv| nv as *const MjsValue);
    let argv_ptr = if argv.is_empty() {
        std::ptr::null()
    } else {
        argv.as_ptr()
    };

    let ret = unsafe { (native.cb)(argv.len() as c_int, argv_ptr, this_ptr, native.userdata) };
    Ok(unsafe { Slot::from_callback_return(ret) })
}

fn slot_to_borrowed_arg(slot: &Slot, guards: &mut Vec<CString>) -> Result<MjsValue, String> {
    let mut nv = MjsValue::null();
    nv.kind = slot.kind_tag();
    match slot {
        Slot::Null => {}
        Slot::Number(n) => nv.num = *n,
        Slot::Bool(b) => nv.boolean = i32::from(*b),
        Slot::Str(s) => {
            let text =
                CString::new(s.as_str()).map_err(|_| "string contains NUL byte".to_string())?;
            guards.push(text);
            // The buffer lives on the heap; pushing more guards does not
            // move it.
            nv.str_ = guards
                .last()
                .map_or(std::ptr::null(), |t| t.as_ptr());
        }
        Slot::Handle(_, cell) => nv.handle = cell.as_ptr() as *mut c_void,
    }
    Ok(nv)
}

fn to_number(slot: &Slot) -> Result<f64, String> {
    match slot {
        Slot::Number(n) => Ok(*n),
        Slot::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        _ => Err("value is not a number".to_string()),
    }
}

fn truthy(slot: &Slot) -> bool {
    match slot {
        Slot::Null => false,
        Slot::Number(n) => *n != 0.0,
        Slot::Bool(b) => *b,
        Slot::Str(s) => !s.is_empty(),
        Slot::Handle(..) => true,
    }
}

fn slots_equal(a: &Slot, b: &Slot) -> bool {
    match (a, b) {
        (Slot::Null, Slot::Null) => true,
        (Slot::Number(x), Slot::Number(y)) => x == y,
        (Slot::Bool(x), Slot::Bool(y)) => x == y,
        (Slot::Str(x), Slot::Str(y)) => x == y,
        (Slot::Handle(_, x), Slot::Handle(_, y)) => x.as_ptr() == y.as_ptr(),
        _ => false,
    }
}

fn eval_binary(op: BinOp, a: &Slot, b: &Slot) -> Result<Slot, String> {
    match op {
        BinOp::Add => {
            // String concatenation wins if either side is a string.
            if matches!(a, Slot::Str(_)) || matches!(b, Slot::Str(_)) {
                Ok(Slot::Str(format!("{}{}", display_slot(a), display_slot(b))))
            } else {
                Ok(Slot::Number(to_number(a)? + to_number(b)?))
            }
        }
        BinOp::Sub => Ok(Slot::Number(to_number(a)? - to_number(b)?)),
        BinOp::Mul => Ok(Slot::Number(to_number(a)? * to_number(b)?)),
        BinOp::Div => Ok(Slot::Number(to_number(a)? / to_number(b)?)),
        BinOp::Eq => Ok(Slot::Bool(slots_equal(a, b))),
        BinOp::NotEq => Ok(Slot::Bool(!slots_equal(a, b))),
        BinOp::Lt => Ok(Slot::Bool(to_number(a)? < to_number(b)?)),
        BinOp::LtEq => Ok(Slot::Bool(to_number(a)? <= to_number(b)?)),
        BinOp::Gt => Ok(Slot::Bool(to_number(a)? > to_number(b)?)),
        BinOp::GtEq => Ok(Slot::Bool(to_number(a)? >= to_number(b)?)),
    }
}

/// Render a slot the way `minijs_run` reports results.
pub(crate) fn display_slot(slot: &Slot) -> String {
    match slot {
        Slot::Null => "null".to_string(),
        Slot::Number(n) => format_number(*n),
        Slot::Bool(b) => b.to_string(),
        Slot::Str(s) => s.clone(),
        Slot::Handle(_, cell) => match &*cell.cell().body.borrow() {
            Body::Class(cb) => format!("[class {}]", cb.name),
            Body::Array(_) => "[array]".to_string(),
            Body::Function(_) => "[function]".to_string(),
            Body::Object(_) => "[object]".to_string(),
        },
    }
}

/// Whole numbers print without a fractional part.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_precedence() {
        let interp = Interp::new();
        assert_eq!(interp.run("2 + 3 * 4"), "14");
        assert_eq!(interp.run("(2 + 3) * 4"), "20");
        assert_eq!(interp.run("10 / 4"), "2.5");
        assert_eq!(interp.run("-5 + 1"), "-4");
    }

    #[test]
    fn variables_and_assignment() {
        let interp = Interp::new();
        assert_eq!(interp.run("var x = 10; x"), "10");
        assert_eq!(interp.run("var x = 5; x = x + 1; x"), "6");
    }

    #[test]
    fn string_concat() {
        let interp = Interp::new();
        assert_eq!(interp.run("'a' + 'b'"), "ab");
        assert_eq!(interp.run("'n=' + 3"), "n=3");
    }

    #[test]
    fn comparisons() {
        let interp = Interp::new();
        assert_eq!(interp.run("1 < 2"), "true");
        assert_eq!(interp.run("2 <= 1"), "false");
        assert_eq!(interp.run("3 == 3"), "true");
        assert_eq!(interp.run("3 != 3"), "false");
        assert_eq!(interp.run("!0"), "true");
    }

    #[test]
    fn errors_are_contained() {
        let interp = Interp::new();
        assert!(interp.run("nope").starts_with("Error: "));
        assert!(interp.run("1 +").starts_with("Error: "));
        assert!(interp.run("#").starts_with("Error: "));
    }

    #[test]
    fn whole_numbers_print_as_integers() {
        assert_eq!(format_number(6.0), "6");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-0.0), "0");
    }
}
