// Parser for the classic (.xta) timed automata syntax.
//
// Parses a token stream (from the lexer) into a surface AST using chumsky
// combinators. Fragment-level entry points (declarations, parameters,
// expressions, sync labels, queries) are exposed for the markup driver,
// which assembles a document from embedded text fragments.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;
use chumsky::Boxed;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing a fragment: output plus any errors.
#[derive(Debug)]
pub struct ParseResult<T> {
    pub output: Option<T>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

type PErr<'t> = extra::Err<Rich<'t, Token, SimpleSpan>>;
type BoxedP<'t, I, O> = Boxed<'t, 't, I, O, PErr<'t>>;

// ── Runner ──────────────────────────────────────────────────────────────────
//
// Lexes the fragment, adapts the tokens to a chumsky stream and merges lex
// errors with parse errors. A macro rather than a function so the mapped
// stream type never needs to be named.

macro_rules! run_parser {
    ($source:expr, $parser:expr) => {{
        let lex_result = crate::lexer::lex($source);
        let len = $source.len();

        let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
            let cspan: SimpleSpan = (span.start..span.end).into();
            (tok, cspan)
        });
        let eoi: SimpleSpan = (len..len).into();
        let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

        let (output, parse_errors) = $parser.parse(stream).into_output_errors();

        let mut errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
            .errors
            .into_iter()
            .map(|e| {
                let span: SimpleSpan = (e.span.start..e.span.end).into();
                Rich::custom(span, e.message)
            })
            .collect();
        errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

        ParseResult { output, errors }
    }};
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Parse a complete classic-syntax model file.
pub fn parse_document(source: &str, newxta: bool) -> ParseResult<Document> {
    run_parser!(
        source,
        decls_parser(source, newxta)
            .map_with(|decls, e| Document {
                decls,
                span: e.span(),
            })
            .then_ignore(end())
    )
}

/// Parse a declarations fragment (variables, functions, templates,
/// instantiations, system line).
pub fn parse_declarations(source: &str, newxta: bool) -> ParseResult<Vec<Decl>> {
    run_parser!(source, decls_parser(source, newxta).then_ignore(end()))
}

/// Parse a parameter-list fragment, e.g. `int[0,10] &x, const bool b`.
pub fn parse_parameters(source: &str) -> ParseResult<Vec<Param>> {
    run_parser!(
        source,
        param_parser(source)
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .then_ignore(end())
    )
}

/// Parse a single expression (no comma operator at the top level).
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let (_, assign) = expr_pair(source);
    run_parser!(source, assign.then_ignore(end()))
}

/// Parse an assignment label: a comma expression.
pub fn parse_assignment_list(source: &str) -> ParseResult<Expr> {
    let (expr, _) = expr_pair(source);
    run_parser!(source, expr.then_ignore(end()))
}

/// Parse a sync label, e.g. `a!` or `c[i]?`.
pub fn parse_sync(source: &str) -> ParseResult<SyncLabel> {
    run_parser!(source, sync_label_parser(source).then_ignore(end()))
}

/// Parse one query line.
pub fn parse_query(source: &str) -> ParseResult<QueryDecl> {
    run_parser!(source, query_parser(source).then_ignore(end()))
}

// ── Identifier ──────────────────────────────────────────────────────────────

fn ident_parser<'t, 's: 't, I>(source: &'s str) -> BoxedP<'t, I, Ident>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    just(Token::Ident)
        .map_with(move |_, e| {
            let span: SimpleSpan = e.span();
            Ident {
                name: source[span.start()..span.end()].to_string(),
                span,
            }
        })
        .boxed()
}

// ── Expressions ─────────────────────────────────────────────────────────────

fn join(a: Span, b: Span) -> Span {
    (a.start()..b.end()).into()
}

enum PostOp {
    Call(Vec<Expr>),
    Index(Expr),
    Field(Ident),
    Inc,
    Dec,
}

#[derive(Clone, Copy)]
enum PreOp {
    Not,
    Neg,
    Inc,
    Dec,
}

/// Build the expression grammar. Returns `(comma_level, assign_level)`:
/// the comma operator appears only in assignment labels and statement
/// expressions, never in argument lists or initializers.
fn expr_pair<'t, 's: 't, I>(source: &'s str) -> (BoxedP<'t, I, Expr>, BoxedP<'t, I, Expr>)
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let ident = ident_parser(source);

    let mut expr = Recursive::declare();
    let mut assign = Recursive::declare();

    let literal = select! {
        Token::Number(n) = e => Expr { kind: ExprKind::Int(n), span: e.span() },
        Token::True = e => Expr { kind: ExprKind::Bool(true), span: e.span() },
        Token::False = e => Expr { kind: ExprKind::Bool(false), span: e.span() },
    };

    // `{ e, field: e, ... }` initializer list.
    let list_item = ident
        .clone()
        .then_ignore(just(Token::Colon))
        .or_not()
        .then(assign.clone());
    let list = list_item
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace))
        .map_with(|items, e| Expr {
            kind: ExprKind::List(items),
            span: e.span(),
        });

    let primary = choice((
        literal,
        list,
        ident.clone().map(|id| Expr {
            span: id.span,
            kind: ExprKind::Ident(id.name),
        }),
        expr.clone()
            .delimited_by(just(Token::LParen), just(Token::RParen)),
    ))
    .boxed();

    // ── Postfix: calls, indexing, field access, ++/-- ──

    let args = assign
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LParen), just(Token::RParen));

    let post_op = choice((
        args.map_with(|a, e| (PostOp::Call(a), e.span())),
        expr.clone()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map_with(|i, e| (PostOp::Index(i), e.span())),
        just(Token::Dot)
            .ignore_then(ident.clone())
            .map(|id| {
                let span = id.span;
                (PostOp::Field(id), span)
            }),
        just(Token::PlusPlus).map_with(|_, e| (PostOp::Inc, e.span())),
        just(Token::MinusMinus).map_with(|_, e| (PostOp::Dec, e.span())),
    ));

    let postfix = primary
        .foldl(post_op.repeated(), |base, (op, op_span)| {
            let span = join(base.span, op_span);
            let kind = match op {
                PostOp::Call(args) => ExprKind::Call(Box::new(base), args),
                PostOp::Index(index) => ExprKind::Index(Box::new(base), Box::new(index)),
                PostOp::Field(field) => ExprKind::Field(Box::new(base), field),
                PostOp::Inc => ExprKind::IncDec(IncDecOp::PostInc, Box::new(base)),
                PostOp::Dec => ExprKind::IncDec(IncDecOp::PostDec, Box::new(base)),
            };
            Expr { kind, span }
        })
        .boxed();

    // ── Prefix: !, unary minus, ++/-- ──

    let pre_op = choice((
        just(Token::Bang).to(PreOp::Not),
        just(Token::Minus).to(PreOp::Neg),
        just(Token::PlusPlus).to(PreOp::Inc),
        just(Token::MinusMinus).to(PreOp::Dec),
    ))
    .map_with(|op, e| (op, e.span()));

    let unary = pre_op
        .repeated()
        .foldr(postfix, |(op, op_span), operand| {
            let span = join(op_span, operand.span);
            let kind = match op {
                PreOp::Not => ExprKind::Unary(UnOp::Not, Box::new(operand)),
                PreOp::Neg => ExprKind::Unary(UnOp::Neg, Box::new(operand)),
                PreOp::Inc => ExprKind::IncDec(IncDecOp::PreInc, Box::new(operand)),
                PreOp::Dec => ExprKind::IncDec(IncDecOp::PreDec, Box::new(operand)),
            };
            Expr { kind, span }
        })
        .boxed();

    // ── Binary operator cascade, loosest last ──

    let mk_bin = |lhs: Expr, (op, rhs): (BinOp, Expr)| {
        let span = join(lhs.span, rhs.span);
        Expr {
            kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
            span,
        }
    };

    let product = unary
        .clone()
        .foldl(
            choice((
                just(Token::Star).to(BinOp::Mul),
                just(Token::Slash).to(BinOp::Div),
                just(Token::Percent).to(BinOp::Mod),
            ))
            .then(unary)
            .repeated(),
            mk_bin,
        )
        .boxed();

    let sum = product
        .clone()
        .foldl(
            choice((
                just(Token::Plus).to(BinOp::Add),
                just(Token::Minus).to(BinOp::Sub),
            ))
            .then(product)
            .repeated(),
            mk_bin,
        )
        .boxed();

    let shift = sum
        .clone()
        .foldl(
            choice((
                just(Token::Shl).to(BinOp::Shl),
                just(Token::Shr).to(BinOp::Shr),
            ))
            .then(sum)
            .repeated(),
            mk_bin,
        )
        .boxed();

    let minmax = shift
        .clone()
        .foldl(
            choice((
                just(Token::MinOp).to(BinOp::Min),
                just(Token::MaxOp).to(BinOp::Max),
            ))
            .then(shift)
            .repeated(),
            mk_bin,
        )
        .boxed();

    let relational = minmax
        .clone()
        .foldl(
            choice((
                just(Token::Le).to(BinOp::Le),
                just(Token::Ge).to(BinOp::Ge),
                just(Token::Lt).to(BinOp::Lt),
                just(Token::Gt).to(BinOp::Gt),
            ))
            .then(minmax)
            .repeated(),
            mk_bin,
        )
        .boxed();

    let equality = relational
        .clone()
        .foldl(
            choice((
                just(Token::EqEq).to(BinOp::Eq),
                just(Token::Neq).to(BinOp::Ne),
            ))
            .then(relational)
            .repeated(),
            mk_bin,
        )
        .boxed();

    let bit_and = equality
        .clone()
        .foldl(
            just(Token::Amp).to(BinOp::BitAnd).then(equality).repeated(),
            mk_bin,
        )
        .boxed();

    let bit_xor = bit_and
        .clone()
        .foldl(
            just(Token::Caret).to(BinOp::BitXor).then(bit_and).repeated(),
            mk_bin,
        )
        .boxed();

    let bit_or = bit_xor
        .clone()
        .foldl(
            just(Token::Pipe).to(BinOp::BitOr).then(bit_xor).repeated(),
            mk_bin,
        )
        .boxed();

    let log_and = bit_or
        .clone()
        .foldl(
            just(Token::AndAnd).to(BinOp::And).then(bit_or).repeated(),
            mk_bin,
        )
        .boxed();

    let log_or = log_and
        .clone()
        .foldl(
            just(Token::OrOr).to(BinOp::Or).then(log_and).repeated(),
            mk_bin,
        )
        .boxed();

    // ── Ternary and assignment (right-associative) ──

    let ternary = log_or
        .clone()
        .then(
            just(Token::Question)
                .ignore_then(assign.clone())
                .then_ignore(just(Token::Colon))
                .then(assign.clone())
                .or_not(),
        )
        .map(|(cond, tail)| match tail {
            Some((then_e, else_e)) => {
                let span = join(cond.span, else_e.span);
                Expr {
                    kind: ExprKind::Ternary(Box::new(cond), Box::new(then_e), Box::new(else_e)),
                    span,
                }
            }
            None => cond,
        })
        .boxed();

    let assign_op = choice((
        just(Token::ColonEq).to(AssignOp::Assign),
        just(Token::Eq).to(AssignOp::Assign),
        just(Token::PlusEq).to(AssignOp::Add),
        just(Token::MinusEq).to(AssignOp::Sub),
        just(Token::StarEq).to(AssignOp::Mul),
        just(Token::SlashEq).to(AssignOp::Div),
        just(Token::PercentEq).to(AssignOp::Mod),
        just(Token::AmpEq).to(AssignOp::And),
        just(Token::PipeEq).to(AssignOp::Or),
        just(Token::CaretEq).to(AssignOp::Xor),
        just(Token::ShlEq).to(AssignOp::Shl),
        just(Token::ShrEq).to(AssignOp::Shr),
    ));

    assign.define(
        ternary
            .then(assign_op.then(assign.clone()).or_not())
            .map(|(lhs, tail)| match tail {
                Some((op, rhs)) => {
                    let span = join(lhs.span, rhs.span);
                    Expr {
                        kind: ExprKind::Assign(op, Box::new(lhs), Box::new(rhs)),
                        span,
                    }
                }
                None => lhs,
            }),
    );

    expr.define(assign.clone().foldl(
        just(Token::Comma).ignore_then(assign.clone()).repeated(),
        |lhs, rhs| {
            let span = join(lhs.span, rhs.span);
            Expr {
                kind: ExprKind::Comma(Box::new(lhs), Box::new(rhs)),
                span,
            }
        },
    ));

    (expr.boxed(), assign.boxed())
}

// ── Types and declarators ───────────────────────────────────────────────────

fn type_spec_parser<'t, 's: 't, I>(source: &'s str) -> BoxedP<'t, I, TypeSpec>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let (_, assign) = expr_pair(source);
    let ident = ident_parser(source);

    recursive(|type_spec| {
        // Record fields: declarators without initializers.
        let field_declarator = ident
            .clone()
            .then(
                assign
                    .clone()
                    .delimited_by(just(Token::LBracket), just(Token::RBracket))
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(name, array_dims)| Declarator {
                name,
                array_dims,
                init: None,
            });

        let field_decl = type_spec
            .clone()
            .then(
                field_declarator
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .then_ignore(just(Token::Semi))
            .map(|(spec, declarators)| VarDecl { spec, declarators });

        let struct_ty = just(Token::Struct)
            .ignore_then(
                field_decl
                    .repeated()
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(TypeSpecKind::Struct);

        let range = assign
            .clone()
            .then_ignore(just(Token::Comma))
            .then(assign.clone())
            .delimited_by(just(Token::LBracket), just(Token::RBracket));

        let int_ty = just(Token::Int)
            .ignore_then(range.or_not())
            .map(TypeSpecKind::Int);

        let chan_ty = just(Token::Urgent)
            .or_not()
            .then(just(Token::Broadcast).or_not())
            .then_ignore(just(Token::Chan))
            .map(|(urgent, broadcast)| TypeSpecKind::Chan {
                urgent: urgent.is_some(),
                broadcast: broadcast.is_some(),
            });

        let base = choice((
            int_ty,
            just(Token::Bool).to(TypeSpecKind::Bool),
            just(Token::Clock).to(TypeSpecKind::Clock),
            just(Token::Void).to(TypeSpecKind::Void),
            chan_ty,
            struct_ty,
        ));

        just(Token::Const)
            .or_not()
            .then(base)
            .map_with(|(constant, kind), e| TypeSpec {
                constant: constant.is_some(),
                kind,
                span: e.span(),
            })
            .boxed()
    })
    .boxed()
}

fn declarator_parser<'t, 's: 't, I>(source: &'s str) -> BoxedP<'t, I, Declarator>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let (_, assign) = expr_pair(source);
    let ident = ident_parser(source);

    ident
        .then(
            assign
                .clone()
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .repeated()
                .collect::<Vec<_>>(),
        )
        .then(just(Token::Eq).ignore_then(assign).or_not())
        .map(|((name, array_dims), init)| Declarator {
            name,
            array_dims,
            init,
        })
        .boxed()
}

fn var_decl_parser<'t, 's: 't, I>(source: &'s str) -> BoxedP<'t, I, VarDecl>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    type_spec_parser(source)
        .then(
            declarator_parser(source)
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .then_ignore(just(Token::Semi))
        .map(|(spec, declarators)| VarDecl { spec, declarators })
        .boxed()
}

fn param_parser<'t, 's: 't, I>(source: &'s str) -> BoxedP<'t, I, Param>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let (_, assign) = expr_pair(source);

    type_spec_parser(source)
        .then(just(Token::Amp).or_not())
        .then(ident_parser(source))
        .then(
            assign
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(((spec, amp), name), array_dims)| Param {
            spec,
            reference: amp.is_some(),
            name,
            array_dims,
        })
        .boxed()
}

// ── Statements ──────────────────────────────────────────────────────────────

fn stmt_parser<'t, 's: 't, I>(source: &'s str) -> BoxedP<'t, I, Stmt>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let (expr, _) = expr_pair(source);
    let var_decl = var_decl_parser(source);

    recursive(|stmt| {
        let block = stmt
            .clone()
            .repeated()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBrace), just(Token::RBrace));

        let empty = just(Token::Semi).map_with(|_, e| Stmt::Empty(e.span()));

        let paren_expr = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let if_stmt = just(Token::If)
            .ignore_then(paren_expr.clone())
            .then(stmt.clone())
            .then(just(Token::Else).ignore_then(stmt.clone()).or_not())
            .map(|((cond, then_branch), else_branch)| Stmt::If {
                cond,
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            });

        let while_stmt = just(Token::While)
            .ignore_then(paren_expr.clone())
            .then(stmt.clone())
            .map(|(cond, body)| Stmt::While {
                cond,
                body: Box::new(body),
            });

        let do_stmt = just(Token::Do)
            .ignore_then(stmt.clone())
            .then_ignore(just(Token::While))
            .then(paren_expr.clone())
            .then_ignore(just(Token::Semi))
            .map(|(body, cond)| Stmt::DoWhile {
                body: Box::new(body),
                cond,
            });

        let for_stmt = just(Token::For)
            .ignore_then(
                expr.clone()
                    .then_ignore(just(Token::Semi))
                    .then(expr.clone())
                    .then_ignore(just(Token::Semi))
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(stmt.clone())
            .map(|(((init, cond), step), body)| Stmt::For {
                init,
                cond,
                step,
                body: Box::new(body),
            });

        let case_arm = just(Token::Case)
            .ignore_then(expr.clone())
            .then_ignore(just(Token::Colon))
            .then(stmt.clone().repeated().collect::<Vec<_>>())
            .map(|(cond, body)| Stmt::Case { cond, body });

        let default_arm = just(Token::Default)
            .ignore_then(just(Token::Colon))
            .ignore_then(stmt.clone().repeated().collect::<Vec<_>>())
            .map_with(|body, e| Stmt::DefaultCase {
                body,
                span: e.span(),
            });

        let switch_stmt = just(Token::Switch)
            .ignore_then(paren_expr.clone())
            .then(
                case_arm
                    .or(default_arm)
                    .repeated()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map(|(cond, arms)| Stmt::Switch { cond, arms });

        let return_stmt = just(Token::Return)
            .ignore_then(expr.clone().or_not())
            .then_ignore(just(Token::Semi))
            .map_with(|value, e| Stmt::Return {
                value,
                span: e.span(),
            });

        let break_stmt = just(Token::Break)
            .then_ignore(just(Token::Semi))
            .map_with(|_, e| Stmt::Break(e.span()));

        let continue_stmt = just(Token::Continue)
            .then_ignore(just(Token::Semi))
            .map_with(|_, e| Stmt::Continue(e.span()));

        let expr_stmt = expr
            .clone()
            .then_ignore(just(Token::Semi))
            .map(Stmt::Expr);

        choice((
            block.map(Stmt::Block),
            empty,
            if_stmt,
            while_stmt,
            do_stmt,
            for_stmt,
            switch_stmt,
            return_stmt,
            break_stmt,
            continue_stmt,
            var_decl.map(Stmt::Decl),
            expr_stmt,
        ))
        .boxed()
    })
    .boxed()
}

// ── Sync labels and queries ─────────────────────────────────────────────────

fn sync_label_parser<'t, 's: 't, I>(source: &'s str) -> BoxedP<'t, I, SyncLabel>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let (_, assign) = expr_pair(source);

    assign
        .then(choice((
            just(Token::Bang).to(SyncDir::Send),
            just(Token::Question).to(SyncDir::Recv),
        )))
        .map_with(|(channel, dir), e| SyncLabel {
            channel,
            dir,
            span: e.span(),
        })
        .boxed()
}

fn query_parser<'t, 's: 't, I>(source: &'s str) -> BoxedP<'t, I, QueryDecl>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let (_, assign) = expr_pair(source);
    let ident = ident_parser(source);

    let quant = ident
        .then(choice((
            just(Token::LBracket)
                .ignore_then(just(Token::RBracket))
                .to(true),
            just(Token::Lt).ignore_then(just(Token::Gt)).to(false),
        )))
        .try_map(|(id, is_box), span| match (id.name.as_str(), is_box) {
            ("A", true) => Ok(PathQuant::Always),
            ("A", false) => Ok(PathQuant::Eventually),
            ("E", true) => Ok(PathQuant::ExistsAlways),
            ("E", false) => Ok(PathQuant::Exists),
            _ => Err(Rich::custom(
                span,
                format!("unknown path quantifier '{}'", id.name),
            )),
        });

    let prop = assign
        .clone()
        .then(just(Token::Leadsto).ignore_then(assign).or_not())
        .map(|(lhs, rhs)| match rhs {
            Some(rhs) => {
                let span = join(lhs.span, rhs.span);
                Expr {
                    kind: ExprKind::Leadsto(Box::new(lhs), Box::new(rhs)),
                    span,
                }
            }
            None => lhs,
        });

    quant
        .or_not()
        .then(prop)
        .map_with(|(quant, expr), e| QueryDecl {
            quant,
            expr,
            span: e.span(),
        })
        .boxed()
}

// ── Declarations, templates, instantiations ─────────────────────────────────

fn decls_parser<'t, 's: 't, I>(source: &'s str, newxta: bool) -> BoxedP<'t, I, Vec<Decl>>
where
    't: 's,
    I: ValueInput<'t, Token = Token, Span = SimpleSpan>,
{
    let (expr, assign) = expr_pair(source);
    let ident = ident_parser(source);
    let var_decl = var_decl_parser(source);
    let stmt = stmt_parser(source);

    let block = stmt
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    let params = param_parser(source)
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>();

    let func = type_spec_parser(source)
        .then(ident.clone())
        .then(
            params
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(block)
        .map_with(|(((ret, name), params), body), e| FunctionDecl {
            ret,
            name,
            params,
            body,
            span: e.span(),
        });

    // ── Template sections ──

    let state_item = ident
        .clone()
        .then(
            expr.clone()
                .delimited_by(just(Token::LBrace), just(Token::RBrace))
                .or_not(),
        )
        .map(|(name, invariant)| LocationDecl { name, invariant });

    let states = just(Token::State)
        .ignore_then(
            state_item
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .then_ignore(just(Token::Semi));

    let init_decl = just(Token::Init)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Semi));

    let guard_label = just(Token::Guard)
        .ignore_then(expr.clone())
        .then_ignore(just(Token::Semi));

    let sync_label = just(Token::Sync)
        .ignore_then(sync_label_parser(source))
        .then_ignore(just(Token::Semi));

    let assign_label = just(Token::Assign)
        .ignore_then(expr.clone())
        .then_ignore(just(Token::Semi));

    let trans_item = ident
        .clone()
        .then_ignore(just(Token::Arrow))
        .then(ident.clone())
        .then(
            guard_label
                .or_not()
                .then(sync_label.or_not())
                .then(assign_label.or_not())
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|((source_s, target), ((guard, sync), assign_e)), e| TransitionDecl {
            source: source_s,
            target,
            guard,
            sync,
            assign: assign_e,
            span: e.span(),
        });

    let transitions = just(Token::Trans)
        .ignore_then(
            trans_item
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .then_ignore(just(Token::Semi));

    let template_item = choice((
        func.clone().map(Decl::Func),
        var_decl.clone().map(Decl::Var),
    ));

    let template = just(Token::Process)
        .ignore_then(ident.clone())
        .then(
            params
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then(
            template_item
                .repeated()
                .collect::<Vec<_>>()
                .then(states.or_not())
                .then(init_decl.or_not())
                .then(transitions.or_not())
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|((name, params), (((decls, states), init), transitions)), e| {
            Decl::Template(TemplateDecl {
                name,
                params,
                decls,
                states: states.unwrap_or_default(),
                init,
                transitions: transitions.unwrap_or_default(),
                span: e.span(),
            })
        });

    // ── Instantiation and system line ──

    let inst_op = just(if newxta { Token::ColonEq } else { Token::Eq });

    let instance = ident
        .clone()
        .then_ignore(inst_op)
        .then(ident.clone())
        .then(
            assign
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then_ignore(just(Token::Semi))
        .map_with(|((name, template), args), e| {
            Decl::Inst(InstanceDecl {
                name,
                template,
                args,
                span: e.span(),
            })
        });

    let system_line = just(Token::System)
        .ignore_then(
            ident
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .then_ignore(just(Token::Semi))
        .map_with(|processes, e| {
            Decl::System(SystemLine {
                processes,
                span: e.span(),
            })
        });

    choice((
        template,
        func.map(Decl::Func),
        var_decl.map(Decl::Var),
        system_line,
        instance,
    ))
    .repeated()
    .collect::<Vec<_>>()
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str) -> Document {
        let result = parse_document(source, true);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        result.output.expect("no output")
    }

    fn expr(source: &str) -> Expr {
        let result = parse_expression(source);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        result.output.expect("no output")
    }

    #[test]
    fn variable_declarations() {
        let d = doc("int x; const int[0,10] n = 5; clock c1, c2; urgent chan a;");
        assert_eq!(d.decls.len(), 4);
        match &d.decls[1] {
            Decl::Var(v) => {
                assert!(v.spec.constant);
                assert!(matches!(v.spec.kind, TypeSpecKind::Int(Some(_))));
                assert!(v.declarators[0].init.is_some());
            }
            other => panic!("expected var decl, got {:?}", other),
        }
        match &d.decls[3] {
            Decl::Var(v) => assert!(matches!(
                v.spec.kind,
                TypeSpecKind::Chan {
                    urgent: true,
                    broadcast: false
                }
            )),
            other => panic!("expected chan decl, got {:?}", other),
        }
    }

    #[test]
    fn array_and_struct_declarations() {
        let d = doc("int a[3] = { 1, 2, 3 }; struct { int x; int y; } p = { 0, y: 1 };");
        assert_eq!(d.decls.len(), 2);
        match &d.decls[0] {
            Decl::Var(v) => assert_eq!(v.declarators[0].array_dims.len(), 1),
            other => panic!("expected array decl, got {:?}", other),
        }
        match &d.decls[1] {
            Decl::Var(v) => match &v.declarators[0].init {
                Some(Expr {
                    kind: ExprKind::List(items),
                    ..
                }) => {
                    assert_eq!(items.len(), 2);
                    assert!(items[0].0.is_none());
                    assert_eq!(items[1].0.as_ref().unwrap().name, "y");
                }
                other => panic!("expected list initializer, got {:?}", other),
            },
            other => panic!("expected struct decl, got {:?}", other),
        }
    }

    #[test]
    fn precedence_shapes() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        match expr("1 + 2 * 3").kind {
            ExprKind::Binary(BinOp::Add, _, rhs) => {
                assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, _, _)))
            }
            other => panic!("unexpected shape: {:?}", other),
        }
        // x < y + 1 parses as x < (y + 1)
        match expr("x < y + 1").kind {
            ExprKind::Binary(BinOp::Lt, _, rhs) => {
                assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Add, _, _)))
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn assignment_is_right_associative() {
        match expr("x := y := 1").kind {
            ExprKind::Assign(AssignOp::Assign, _, rhs) => {
                assert!(matches!(rhs.kind, ExprKind::Assign(AssignOp::Assign, _, _)))
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn ternary_and_postfix() {
        match expr("a ? b[1] : c.f").kind {
            ExprKind::Ternary(_, t, f) => {
                assert!(matches!(t.kind, ExprKind::Index(_, _)));
                assert!(matches!(f.kind, ExprKind::Field(_, _)));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn template_with_transitions() {
        let d = doc(
            "process P(int &x, const int y) {\n\
             clock c;\n\
             state s0 { c <= 5 }, s1;\n\
             init s0;\n\
             trans s0 -> s1 { guard x > 2; sync a!; assign x := y; },\n\
                   s1 -> s0 { };\n\
             }",
        );
        match &d.decls[0] {
            Decl::Template(t) => {
                assert_eq!(t.params.len(), 2);
                assert!(t.params[0].reference);
                assert_eq!(t.states.len(), 2);
                assert!(t.states[0].invariant.is_some());
                assert_eq!(t.init.as_ref().unwrap().name, "s0");
                assert_eq!(t.transitions.len(), 2);
                let tr = &t.transitions[0];
                assert!(tr.guard.is_some());
                assert_eq!(tr.sync.as_ref().unwrap().dir, SyncDir::Send);
                assert!(tr.assign.is_some());
            }
            other => panic!("expected template, got {:?}", other),
        }
    }

    #[test]
    fn instantiation_dialects() {
        let new = parse_document("P1 := T(1, x); system P1;", true);
        assert!(new.errors.is_empty(), "{:?}", new.errors);
        let old = parse_document("P1 = T(1, x); system P1;", false);
        assert!(old.errors.is_empty(), "{:?}", old.errors);
        // old-style `=` is rejected in the new dialect
        let bad = parse_document("P1 = T(1); system P1;", true);
        assert!(!bad.errors.is_empty());
    }

    #[test]
    fn function_with_statements() {
        let d = doc(
            "int f(int n) {\n\
               int s = 0;\n\
               for (i = 0; i < n; i++) { s += i; }\n\
               while (s > 100) s--;\n\
               if (s == 0) return 1; else return s;\n\
             }",
        );
        match &d.decls[0] {
            Decl::Func(f) => {
                assert_eq!(f.name.name, "f");
                assert_eq!(f.body.len(), 4);
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn sync_labels() {
        let send = parse_sync("a!").output.unwrap();
        assert_eq!(send.dir, SyncDir::Send);
        let recv = parse_sync("c[i]?").output.unwrap();
        assert_eq!(recv.dir, SyncDir::Recv);
        assert!(matches!(recv.channel.kind, ExprKind::Index(_, _)));
    }

    #[test]
    fn queries() {
        let q = parse_query("A[] x < 5").output.unwrap();
        assert_eq!(q.quant, Some(PathQuant::Always));
        let q = parse_query("E<> done == 1").output.unwrap();
        assert_eq!(q.quant, Some(PathQuant::Exists));
        let q = parse_query("x > 1 --> y > 1").output.unwrap();
        assert_eq!(q.quant, None);
        assert!(matches!(q.expr.kind, ExprKind::Leadsto(_, _)));
    }

    #[test]
    fn comma_expressions_only_at_list_level() {
        let list = parse_assignment_list("x := 1, y := 2").output.unwrap();
        assert!(matches!(list.kind, ExprKind::Comma(_, _)));
        // the single-expression entry point rejects a trailing comma arm
        let single = parse_expression("x := 1, y := 2");
        assert!(!single.errors.is_empty());
    }

    #[test]
    fn min_max_operators() {
        match expr("a <? b").kind {
            ExprKind::Binary(BinOp::Min, _, _) => {}
            other => panic!("unexpected shape: {:?}", other),
        }
    }
}
