//! Token and type grammar of the textual format.
//!
//! Every parser here skips leading whitespace and `//` comments before its token. Parsers return
//! slices of the original source, so the caller can recover source positions from them.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{
    alpha1, alphanumeric1, char, digit1, multispace1, not_line_ending,
};
use nom::combinator::{consumed, map, map_res, opt, recognize, value, verify};
use nom::multi::{many0, many0_count, separated_list0};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

pub type PResult<'s, T> = IResult<&'s str, T>;

/// A type as written in the source, before it is interned.
#[derive(Debug, Clone, PartialEq)]
pub enum TyExpr<'s> {
    Integer(u32),
    RawPointer,
    Token,
    Tuple(Vec<TyExpr<'s>>),
    Optional(Box<TyExpr<'s>>),
    Parameter(u32),
    BlockStorage(Box<TyExpr<'s>>),
    Function(FnTyExpr<'s>),
    Nominal(&'s str, Vec<TyExpr<'s>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnTyExpr<'s> {
    /// The environment index and the source text naming it.
    pub environment: Option<(&'s str, u32)>,
    pub attributes: Vec<&'s str>,
    pub parameters: Vec<ConventionTyExpr<'s>>,
    pub yields: Option<Vec<ConventionTyExpr<'s>>>,
    pub results: Vec<ConventionTyExpr<'s>>,
    pub error: Option<Box<ConventionTyExpr<'s>>>,
}

/// `@convention T`
#[derive(Debug, Clone, PartialEq)]
pub struct ConventionTyExpr<'s> {
    pub convention: &'s str,
    pub ty: TyExpr<'s>,
}

/// A value type, `T` or `*T`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTyExpr<'s> {
    pub address: bool,
    pub ty: TyExpr<'s>,
}

pub fn skip(input: &str) -> PResult<'_, ()> {
    value(
        (),
        many0_count(alt((
            multispace1,
            recognize(preceded(tag("//"), not_line_ending)),
        ))),
    )(input)
}

pub fn token<'s, O>(
    parser: impl FnMut(&'s str) -> PResult<'s, O>,
) -> impl FnMut(&'s str) -> PResult<'s, O> {
    preceded(skip, parser)
}

pub fn punct<'s>(p: &'static str) -> impl FnMut(&'s str) -> PResult<'s, &'s str> {
    token(tag(p))
}

fn raw_identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

pub fn identifier(input: &str) -> PResult<'_, &str> {
    token(raw_identifier)(input)
}

pub fn keyword<'s>(kw: &'static str) -> impl FnMut(&'s str) -> PResult<'s, &'s str> {
    verify(identifier, move |s: &str| s == kw)
}

pub fn number(input: &str) -> PResult<'_, u32> {
    token(map_res(digit1, str::parse::<u32>))(input)
}

pub fn signed_number(input: &str) -> PResult<'_, i64> {
    token(map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>))(input)
}

pub fn string_literal(input: &str) -> PResult<'_, &str> {
    token(delimited(char('"'), take_while(|c| c != '"'), char('"')))(input)
}

/// The number of a generic environment, together with its source text.
pub fn environment_number(input: &str) -> PResult<'_, (&str, u32)> {
    token(consumed(map_res(digit1, str::parse::<u32>)))(input)
}

/// `%name`, returning the full name including the sigil.
pub fn value_name(input: &str) -> PResult<'_, &str> {
    token(recognize(pair(
        char('%'),
        many0_count(alt((alphanumeric1, tag("_")))),
    )))(input)
}

/// `@name`, returning the name without the sigil.
pub fn symbol_name(input: &str) -> PResult<'_, &str> {
    token(preceded(char('@'), raw_identifier))(input)
}

/// `bbN`
pub fn block_name(input: &str) -> PResult<'_, &str> {
    token(recognize(pair(tag("bb"), digit1)))(input)
}

/// `#Owner.name`
pub fn member(input: &str) -> PResult<'_, (&str, &str)> {
    token(preceded(
        char('#'),
        pair(raw_identifier, preceded(char('.'), raw_identifier)),
    ))(input)
}

/// `#name`
pub fn case_name(input: &str) -> PResult<'_, &str> {
    token(preceded(char('#'), raw_identifier))(input)
}

/// `[qualifier]`
pub fn qualifier(input: &str) -> PResult<'_, &str> {
    delimited(punct("["), identifier, punct("]"))(input)
}

pub fn ty(input: &str) -> PResult<'_, TyExpr<'_>> {
    alt((
        map(function_ty, TyExpr::Function),
        map(preceded(punct("@block_storage"), ty), |t| {
            TyExpr::BlockStorage(Box::new(t))
        }),
        map(preceded(punct("$"), map_res(digit1, str::parse::<u32>)), TyExpr::Parameter),
        map(
            delimited(punct("("), separated_list0(punct(","), ty), punct(")")),
            TyExpr::Tuple,
        ),
        named_ty,
    ))(input)
}

fn named_ty(input: &str) -> PResult<'_, TyExpr<'_>> {
    let (input, name) = identifier(input)?;
    let (input, arguments) = opt(delimited(
        punct("<"),
        separated_list0(punct(","), ty),
        punct(">"),
    ))(input)?;
    let arguments = arguments.unwrap_or_default();
    let bits = name
        .strip_prefix('i')
        .filter(|b| !b.is_empty() && b.bytes().all(|c| c.is_ascii_digit()))
        .and_then(|b| b.parse::<u32>().ok());
    let ty = match (name, bits, arguments.len()) {
        (_, Some(bits), 0) => TyExpr::Integer(bits),
        ("rawptr", _, 0) => TyExpr::RawPointer,
        ("token", _, 0) => TyExpr::Token,
        ("Optional", _, 1) => {
            let mut arguments = arguments;
            TyExpr::Optional(Box::new(arguments.remove(0)))
        }
        _ => TyExpr::Nominal(name, arguments),
    };
    Ok((input, ty))
}

fn convention_ty(input: &str) -> PResult<'_, ConventionTyExpr<'_>> {
    map(
        pair(token(preceded(char('@'), raw_identifier)), ty),
        |(convention, ty)| ConventionTyExpr { convention, ty },
    )(input)
}

fn convention_list(input: &str) -> PResult<'_, Vec<ConventionTyExpr<'_>>> {
    delimited(
        punct("("),
        separated_list0(punct(","), convention_ty),
        punct(")"),
    )(input)
}

/// `fn<#0> @thick @yield_once (params) yields (params) -> (results) throws @owned E`
pub fn function_ty(input: &str) -> PResult<'_, FnTyExpr<'_>> {
    let environment = delimited(
        punct("<"),
        preceded(punct("#"), environment_number),
        punct(">"),
    );
    map(
        preceded(
            keyword("fn"),
            tuple((
                opt(environment),
                many0(token(preceded(char('@'), raw_identifier))),
                convention_list,
                opt(preceded(keyword("yields"), convention_list)),
                preceded(punct("->"), convention_list),
                opt(preceded(keyword("throws"), convention_ty)),
            )),
        ),
        |(environment, attributes, parameters, yields, results, error)| FnTyExpr {
            environment,
            attributes,
            parameters,
            yields,
            results,
            error: error.map(Box::new),
        },
    )(input)
}

pub fn value_ty(input: &str) -> PResult<'_, ValueTyExpr<'_>> {
    map(pair(opt(punct("*")), ty), |(star, ty)| ValueTyExpr {
        address: star.is_some(),
        ty,
    })(input)
}

#[cfg(test)]
mod tests {
    use crate::parser::grammar::{member, skip, ty, value_name, value_ty, TyExpr};
    use tarn_macros::{assert_matches, assert_ok};

    #[test]
    fn test_comments_are_whitespace() {
        let (rest, _) = assert_ok!(skip("  // a comment\n  // another\n  %0"));
        assert_eq!(rest, "%0");
        let (rest, name) = assert_ok!(value_name(" // leading\n %x1 = "));
        assert_eq!(name, "%x1");
        assert_eq!(rest, " = ");
    }

    #[test]
    fn test_parse_nested_types() {
        let (rest, parsed) = assert_ok!(ty("Optional<(i64, Pair<$0, rawptr>)> tail"));
        assert_eq!(rest, " tail");
        let inner = assert_matches!(parsed, TyExpr::Optional(inner) => inner);
        let elements = assert_matches!(*inner, TyExpr::Tuple(elements) => elements);
        assert_eq!(elements[0], TyExpr::Integer(64));
        assert_eq!(
            elements[1],
            TyExpr::Nominal("Pair", vec![TyExpr::Parameter(0), TyExpr::RawPointer])
        );
    }

    #[test]
    fn test_parse_function_type() {
        let source = "fn<#1> @thick @yield_once (@guaranteed Big) yields (@in_guaranteed Big) -> () throws @owned Err";
        let (rest, parsed) = assert_ok!(ty(source));
        assert!(rest.is_empty());
        let f = assert_matches!(parsed, TyExpr::Function(f) => f);
        assert_eq!(f.environment.map(|(_, id)| id), Some(1));
        assert_eq!(f.attributes, vec!["thick", "yield_once"]);
        assert_eq!(f.parameters[0].convention, "guaranteed");
        assert_eq!(f.yields.map(|y| y.len()), Some(1));
        assert!(f.results.is_empty());
        assert_eq!(f.error.map(|e| e.convention), Some("owned"));
    }

    #[test]
    fn test_parse_address_type_and_member() {
        let (_, parsed) = assert_ok!(value_ty(" *Big"));
        assert!(parsed.address);
        assert_eq!(parsed.ty, TyExpr::Nominal("Big", vec![]));
        let (_, (owner, name)) = assert_ok!(member(" #Big.a :"));
        assert_eq!((owner, name), ("Big", "a"));
        // Integer spelling only applies to `i` followed by digits.
        let (_, parsed) = assert_ok!(ty("i8x"));
        assert_eq!(parsed, TyExpr::Nominal("i8x", vec![]));
    }
}
