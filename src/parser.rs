// File: src/parser.rs
//
// Recursive-descent parser with standard Lox precedence climbing. Collects
// every syntax error it can via panic-mode resynchronization at statement
// boundaries instead of bailing out at the first one, matching the
// "report multiple errors in one pass" requirement placed on the compiler
// phase as a whole.

use crate::ast::{BinaryOp, Expr, FunctionDecl, LogicalOp, Stmt, UnaryOp};
use crate::errors::{ErrorKind, LoxError, SourceLocation};
use crate::lexer::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<LoxError>,
}

type ParseResult<T> = Result<T, ()>;

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0, errors: Vec::new() }
    }

    /// Parses the whole token stream, returning the statements successfully
    /// parsed and every syntax error encountered along the way.
    pub fn parse(mut self) -> (Vec<Stmt>, Vec<LoxError>) {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(()) => self.synchronize(),
            }
        }
        (statements, self.errors)
    }

    // --- token stream helpers ---

    fn peek(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_line(&self) -> usize {
        self.tokens[self.pos].line
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if !self.is_at_end() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn matches(&mut self, kinds: &[TokenKind]) -> bool {
        for kind in kinds {
            if self.check(kind) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(LoxError::new(
            ErrorKind::Parse,
            message.into(),
            SourceLocation::new(self.peek_line()),
        ));
    }

    fn consume(&mut self, kind: &TokenKind, message: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            self.error(message.to_string());
            Err(())
        }
    }

    fn consume_identifier(&mut self, message: &str) -> ParseResult<String> {
        if let TokenKind::Identifier(name) = self.peek().clone() {
            self.advance();
            Ok(name)
        } else {
            self.error(message.to_string());
            Err(())
        }
    }

    /// Skips tokens until the parser is positioned at a likely statement
    /// boundary: right after a `;`, or right before a keyword that starts
    /// a declaration or statement.
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if matches!(self.peek(), TokenKind::Semicolon) {
                self.advance();
                return;
            }
            if matches!(
                self.peek(),
                TokenKind::Class
                    | TokenKind::Fun
                    | TokenKind::Var
                    | TokenKind::For
                    | TokenKind::If
                    | TokenKind::While
                    | TokenKind::Print
                    | TokenKind::Return
            ) {
                return;
            }
            self.advance();
        }
    }

    // --- declarations ---

    fn declaration(&mut self) -> ParseResult<Stmt> {
        if self.matches(&[TokenKind::Class]) {
            return self.class_declaration();
        }
        if self.matches(&[TokenKind::Fun]) {
            let line = self.peek_line();
            let decl = self.function("function")?;
            return Ok(Stmt::Function { decl, line });
        }
        if self.matches(&[TokenKind::Var]) {
            return self.var_declaration();
        }
        self.statement()
    }

    fn class_declaration(&mut self) -> ParseResult<Stmt> {
        let line = self.peek_line();
        let name = self.consume_identifier("Expect class name.")?;

        let superclass = if self.matches(&[TokenKind::Less]) {
            Some(self.consume_identifier("Expect superclass name.")?)
        } else {
            None
        };

        self.consume(&TokenKind::LeftBrace, "Expect '{' before class body.")?;
        let mut methods = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            methods.push(self.function("method")?);
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after class body.")?;

        Ok(Stmt::Class { name, superclass, methods, line })
    }

    fn function(&mut self, kind: &str) -> ParseResult<FunctionDecl> {
        let line = self.peek_line();
        let name = self.consume_identifier(&format!("Expect {} name.", kind))?;
        self.consume(&TokenKind::LeftParen, &format!("Expect '(' after {} name.", kind))?;

        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                if params.len() >= 255 {
                    self.error("Can't have more than 255 parameters.");
                }
                params.push(self.consume_identifier("Expect parameter name.")?);
                if !self.matches(&[TokenKind::Comma]) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after parameters.")?;

        self.consume(&TokenKind::LeftBrace, &format!("Expect '{{' before {} body.", kind))?;
        let body = self.block()?;

        Ok(FunctionDecl { name, params, body, line })
    }

    fn var_declaration(&mut self) -> ParseResult<Stmt> {
        let line = self.peek_line();
        let name = self.consume_identifier("Expect variable name.")?;

        let initializer =
            if self.matches(&[TokenKind::Equal]) { Some(self.expression()?) } else { None };

        self.consume(&TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::Var { name, initializer, line })
    }

    // --- statements ---

    fn statement(&mut self) -> ParseResult<Stmt> {
        if self.matches(&[TokenKind::For]) {
            return self.for_statement();
        }
        if self.matches(&[TokenKind::If]) {
            return self.if_statement();
        }
        if self.matches(&[TokenKind::Print]) {
            return self.print_statement();
        }
        if self.matches(&[TokenKind::Return]) {
            return self.return_statement();
        }
        if self.matches(&[TokenKind::While]) {
            return self.while_statement();
        }
        if self.matches(&[TokenKind::LeftBrace]) {
            let line = self.peek_line();
            let statements = self.block()?;
            return Ok(Stmt::Block { statements, line });
        }
        self.expression_statement()
    }

    /// Desugars `for (init; cond; incr) body` into
    /// `{ init; while (cond) { body; incr; } }` right here in the parser,
    /// so the compiler never sees a dedicated `for` AST node.
    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.peek_line();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if self.matches(&[TokenKind::Semicolon]) {
            None
        } else if self.matches(&[TokenKind::Var]) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if !self.check(&TokenKind::Semicolon) {
            self.expression()?
        } else {
            Expr::Bool { value: true, line }
        };
        self.consume(&TokenKind::Semicolon, "Expect ';' after loop condition.")?;

        let increment = if !self.check(&TokenKind::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(&TokenKind::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        if let Some(increment) = increment {
            let incr_line = increment.line();
            body = Stmt::Block {
                statements: vec![
                    body,
                    Stmt::Expression { expression: increment, line: incr_line },
                ],
                line: incr_line,
            };
        }

        body = Stmt::While { condition, body: Box::new(body), line };

        if let Some(initializer) = initializer {
            body = Stmt::Block { statements: vec![initializer, body], line };
        }

        Ok(body)
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.peek_line();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.matches(&[TokenKind::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        Ok(Stmt::If { condition, then_branch, else_branch, line })
    }

    fn print_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.peek_line();
        let expression = self.expression()?;
        self.consume(&TokenKind::Semicolon, "Expect ';' after value.")?;
        Ok(Stmt::Print { expression, line })
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.peek_line();
        let value =
            if !self.check(&TokenKind::Semicolon) { Some(self.expression()?) } else { None };
        self.consume(&TokenKind::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt::Return { value, line })
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.peek_line();
        self.consume(&TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(&TokenKind::RightParen, "Expect ')' after condition.")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::While { condition, body, line })
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            match self.declaration() {
                Ok(stmt) => statements.push(stmt),
                Err(()) => {
                    self.synchronize();
                }
            }
        }
        self.consume(&TokenKind::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let expression = self.expression()?;
        let line = expression.line();
        self.consume(&TokenKind::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression { expression, line })
    }

    // --- expressions, lowest to highest precedence ---

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let expr = self.or()?;

        if self.matches(&[TokenKind::Equal]) {
            let line = self.peek_line();
            let value = self.assignment()?;

            return match expr {
                Expr::Variable { name, .. } => {
                    Ok(Expr::Assign { name, value: Box::new(value), line })
                }
                Expr::Get { object, name, .. } => {
                    Ok(Expr::Set { object, name, value: Box::new(value), line })
                }
                _ => {
                    self.error("Invalid assignment target.");
                    Err(())
                }
            };
        }

        Ok(expr)
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.and()?;
        while self.matches(&[TokenKind::Or]) {
            let line = self.peek_line();
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::Or,
                right: Box::new(right),
                line,
            };
        }
        Ok(expr)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.equality()?;
        while self.matches(&[TokenKind::And]) {
            let line = self.peek_line();
            let right = self.equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::And,
                right: Box::new(right),
                line,
            };
        }
        Ok(expr)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut expr = self.comparison()?;
        loop {
            let op = match self.peek() {
                TokenKind::BangEqual => BinaryOp::NotEqual,
                TokenKind::EqualEqual => BinaryOp::Equal,
                _ => break,
            };
            let line = self.peek_line();
            self.advance();
            let right = self.comparison()?;
            expr = Expr::Binary { left: Box::new(expr), op, right: Box::new(right), line };
        }
        Ok(expr)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut expr = self.term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEqual => BinaryOp::GreaterEqual,
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEqual => BinaryOp::LessEqual,
                _ => break,
            };
            let line = self.peek_line();
            self.advance();
            let right = self.term()?;
            expr = Expr::Binary { left: Box::new(expr), op, right: Box::new(right), line };
        }
        Ok(expr)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut expr = self.factor()?;
        loop {
            let op = match self.peek() {
                TokenKind::Minus => BinaryOp::Subtract,
                TokenKind::Plus => BinaryOp::Add,
                _ => break,
            };
            let line = self.peek_line();
            self.advance();
            let right = self.factor()?;
            expr = Expr::Binary { left: Box::new(expr), op, right: Box::new(right), line };
        }
        Ok(expr)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let mut expr = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Slash => BinaryOp::Divide,
                TokenKind::Star => BinaryOp::Multiply,
                _ => break,
            };
            let line = self.peek_line();
            self.advance();
            let right = self.unary()?;
            expr = Expr::Binary { left: Box::new(expr), op, right: Box::new(right), line };
        }
        Ok(expr)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            _ => return self.call(),
        };
        let line = self.peek_line();
        self.advance();
        let right = self.unary()?;
        Ok(Expr::Unary { op, right: Box::new(right), line })
    }

    fn call(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.matches(&[TokenKind::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.matches(&[TokenKind::Dot]) {
                let line = self.peek_line();
                let name = self.consume_identifier("Expect property name after '.'.")?;
                expr = Expr::Get { object: Box::new(expr), name, line };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> ParseResult<Expr> {
        let line = self.peek_line();
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                if args.len() >= 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                args.push(self.expression()?);
                if !self.matches(&[TokenKind::Comma]) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "Expect ')' after arguments.")?;
        Ok(Expr::Call { callee: Box::new(callee), args, line })
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let line = self.peek_line();
        match self.peek().clone() {
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool { value: false, line })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool { value: true, line })
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Nil { line })
            }
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::Number { value, line })
            }
            TokenKind::String(value) => {
                self.advance();
                Ok(Expr::Str { value, line })
            }
            TokenKind::Super => {
                self.advance();
                self.consume(&TokenKind::Dot, "Expect '.' after 'super'.")?;
                let method = self.consume_identifier("Expect superclass method name.")?;
                Ok(Expr::Super { method, line })
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::This { line })
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Variable { name, line })
            }
            TokenKind::LeftParen => {
                self.advance();
                let expression = self.expression()?;
                self.consume(&TokenKind::RightParen, "Expect ')' after expression.")?;
                Ok(Expr::Grouping { expression: Box::new(expression), line })
            }
            _ => {
                self.error("Expect expression.");
                Err(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> (Vec<Stmt>, Vec<LoxError>) {
        let (tokens, lex_errors) = tokenize(src);
        assert!(lex_errors.is_empty(), "unexpected lex errors: {:?}", lex_errors);
        Parser::new(tokens).parse()
    }

    #[test]
    fn parses_arithmetic_precedence() {
        let (stmts, errors) = parse("1 + 2 * 3;");
        assert!(errors.is_empty());
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::Expression { expression: Expr::Binary { op: BinaryOp::Add, right, .. }, .. } => {
                assert!(matches!(**right, Expr::Binary { op: BinaryOp::Multiply, .. }));
            }
            other => panic!("unexpected ast: {:?}", other),
        }
    }

    #[test]
    fn desugars_for_loop_into_while() {
        let (stmts, errors) = parse("for (var i = 0; i < 3; i = i + 1) print i;");
        assert!(errors.is_empty());
        match &stmts[0] {
            Stmt::Block { statements, .. } => {
                assert_eq!(statements.len(), 2);
                assert!(matches!(statements[0], Stmt::Var { .. }));
                assert!(matches!(statements[1], Stmt::While { .. }));
            }
            other => panic!("unexpected ast: {:?}", other),
        }
    }

    #[test]
    fn parses_class_with_superclass_and_methods() {
        let (stmts, errors) =
            parse("class B < A { init(n) { this.n = n; } greet() { print this.n; } }");
        assert!(errors.is_empty());
        match &stmts[0] {
            Stmt::Class { name, superclass, methods, .. } => {
                assert_eq!(name, "B");
                assert_eq!(superclass.as_deref(), Some("A"));
                assert_eq!(methods.len(), 2);
            }
            other => panic!("unexpected ast: {:?}", other),
        }
    }

    #[test]
    fn reports_multiple_syntax_errors_in_one_pass() {
        let (_, errors) = parse("var ; var ;");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn invalid_assignment_target_is_an_error() {
        let (_, errors) = parse("1 = 2;");
        assert_eq!(errors.len(), 1);
    }
}
