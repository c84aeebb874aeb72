use miette::Diagnostic;
use nom::bytes::complete::take_while;
use nom::character::complete::char;
use nom::combinator::{complete, rest, verify};
use nom::error::{Error, ErrorKind};
use nom::IResult;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QueryError {
    #[error("failed to parse emit query `{0}`")]
    #[diagnostic(
        code(driver::invalid_query),
        help("queries look like `mir.fn.<name>` or `mir.global.<name>`")
    )]
    InvalidQuery(String),
    #[error("emit query names the unknown function @{0}")]
    #[diagnostic(code(driver::unknown_function))]
    UnknownFunction(String),
    #[error("emit query names the unknown global @{0}")]
    #[diagnostic(code(driver::unknown_global))]
    UnknownGlobal(String),
}

/// A query for the output of the compiler.
///
/// Dumping an entire lowered module is noisy when only a single function is of interest. Queries
/// narrow the emitted MIR down to the named items.
///
/// ```text
/// query     ::= namespace DOT category DOT query
/// namespace ::= identifier
/// category  ::= identifier
/// query     ::= any
/// ```
///
/// For example, the query `mir.fn.caller` requests the lowered MIR of the function `@caller`.
#[derive(Debug)]
pub enum EmitQuery {
    Mir(MirEmitQuery),
}

impl EmitQuery {
    /// Parse a list of queries.
    pub fn from_queries<S: AsRef<str>>(queries: &[S]) -> Result<Vec<Self>, QueryError> {
        let mut parsed_queries = Vec::with_capacity(queries.len());
        for query in queries {
            let query = query.as_ref();
            let (_, parsed) = EmitQuery::parse(query)
                .map_err(|_| QueryError::InvalidQuery(query.to_owned()))?;
            parsed_queries.push(parsed);
        }
        Ok(parsed_queries)
    }

    /// Parse a single query.
    fn parse(input: &str) -> IResult<&str, Self> {
        let (input, namespace) = take_while(|c: char| c != '.')(input)?;
        let (input, _) = char('.')(input)?;
        match namespace {
            "mir" => {
                let (input, query) = complete(MirEmitQuery::parse)(input)?;
                Ok((input, Self::Mir(query)))
            }
            _ => Err(nom::Err::Failure(Error::new(input, ErrorKind::Tag))),
        }
    }
}

#[derive(Debug)]
pub enum MirEmitQuery {
    /// Emit the MIR for this function
    Function(String),
    /// Emit the declaration and initializer of this global
    Global(String),
}

impl MirEmitQuery {
    /// Parse a `mir` namespace query.
    pub fn parse(input: &str) -> IResult<&str, Self> {
        let (input, category) = take_while(|c: char| c != '.')(input)?;
        let (input, _) = char('.')(input)?;
        let (input, name) = verify(rest, |name: &str| !name.is_empty())(input)?;
        match category {
            "fn" => Ok((input, Self::Function(name.to_owned()))),
            "global" => Ok((input, Self::Global(name.to_owned()))),
            _ => Err(nom::Err::Failure(Error::new(input, ErrorKind::Tag))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::query::{EmitQuery, MirEmitQuery, QueryError};
    use tarn_macros::{assert_err, assert_matches, assert_ok};

    #[test]
    fn test_parse_mir_fn_query() {
        let query = EmitQuery::from_queries(&["mir.fn.caller"]);
        let query = assert_ok!(query);
        assert_eq!(query.len(), 1);
        let function_name =
            assert_matches!(&query[0], EmitQuery::Mir(MirEmitQuery::Function(p)) => p);
        assert_eq!(function_name, "caller");
    }

    #[test]
    fn test_parse_mir_global_query() {
        let query = assert_ok!(EmitQuery::from_queries(&["mir.global.handler"]));
        let name = assert_matches!(&query[0], EmitQuery::Mir(MirEmitQuery::Global(p)) => p);
        assert_eq!(name, "handler");
    }

    #[test]
    fn test_reject_unknown_namespace_and_category() {
        let error = assert_err!(EmitQuery::from_queries(&["hir.fn.caller"]));
        let query = assert_matches!(error, QueryError::InvalidQuery(q) => q);
        assert_eq!(query, "hir.fn.caller");
        assert_err!(EmitQuery::from_queries(&["mir.block.caller"]));
        assert_err!(EmitQuery::from_queries(&["mir.fn."]));
        assert_err!(EmitQuery::from_queries(&["mir"]));
    }
}
