//! PromQL subset parser.
//!
//! Supported: series selectors, range selectors, the `*_over_time` family
//! plus `rate`/`increase`/`delta`, and `sum`/`avg`/`min`/`max`/`count`
//! aggregations with `by` or `without`. Binary operators, subqueries,
//! `offset` and `@` are not part of the language here.

use crate::core::{LanternError, Result};
use crate::metrics::{LabelMatcher, MatchType, METRIC_NAME};
use crate::query::duration::parse_duration;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, map_opt, map_res, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use std::fmt;
use std::time::Duration;

/// `{...}` selector: metric name and label matchers folded together.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    pub matchers: Vec<LabelMatcher>,
}

/// `selector[range]`
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSelector {
    pub selector: VectorSelector,
    pub range: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeFunction {
    Rate,
    Increase,
    Delta,
    AvgOverTime,
    MinOverTime,
    MaxOverTime,
    SumOverTime,
    CountOverTime,
    LastOverTime,
}

impl RangeFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeFunction::Rate => "rate",
            RangeFunction::Increase => "increase",
            RangeFunction::Delta => "delta",
            RangeFunction::AvgOverTime => "avg_over_time",
            RangeFunction::MinOverTime => "min_over_time",
            RangeFunction::MaxOverTime => "max_over_time",
            RangeFunction::SumOverTime => "sum_over_time",
            RangeFunction::CountOverTime => "count_over_time",
            RangeFunction::LastOverTime => "last_over_time",
        }
    }

    /// Whether the result keeps the input's metric name.
    pub fn keeps_metric_name(&self) -> bool {
        matches!(self, RangeFunction::LastOverTime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Count => "count",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grouping {
    /// Aggregate everything into one series
    All,
    By(Vec<String>),
    Without(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Selector(VectorSelector),
    Range(MatrixSelector),
    Call {
        function: RangeFunction,
        arg: MatrixSelector,
    },
    Aggregate {
        op: AggregateOp,
        grouping: Grouping,
        expr: Box<Expr>,
    },
}

impl Expr {
    /// True for expressions that evaluate to a range vector.
    pub fn is_matrix(&self) -> bool {
        matches!(self, Expr::Range(_))
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", m)?;
        }
        f.write_str("}")
    }
}

/// Parses a full expression.
pub fn parse_expr(input: &str) -> Result<Expr> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(LanternError::validation("empty query"));
    }
    match terminated(expr, multispace0)(trimmed) {
        Ok(("", parsed)) => {
            validate(&parsed)?;
            Ok(parsed)
        },
        Ok((rest, _)) => Err(LanternError::validation(format!(
            "unexpected input in query at: {:?}",
            rest
        ))),
        Err(e) => Err(LanternError::validation(format!("failed to parse query: {}", e))),
    }
}

/// Parses a bare series selector, as used by `match[]`.
pub fn parse_selector(input: &str) -> Result<Vec<LabelMatcher>> {
    match parse_expr(input)? {
        Expr::Selector(selector) => Ok(selector.matchers),
        _ => Err(LanternError::validation(format!(
            "expected a series selector, got {:?}",
            input
        ))),
    }
}

/// A selector must have at least one matcher that rejects the empty value,
/// otherwise it would select every series.
fn validate(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Selector(selector) => validate_selector(selector),
        Expr::Range(m) | Expr::Call { arg: m, .. } => validate_selector(&m.selector),
        Expr::Aggregate { expr, .. } => validate(expr),
    }
}

fn validate_selector(selector: &VectorSelector) -> Result<()> {
    if selector.matchers.iter().all(LabelMatcher::matches_empty) {
        return Err(LanternError::validation(format!(
            "selector {} must contain at least one non-empty matcher",
            selector
        )));
    }
    Ok(())
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    preceded(multispace0, inner)
}

fn expr(input: &str) -> IResult<&str, Expr> {
    ws(alt((aggregate, call, range_or_selector)))(input)
}

fn label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn metric_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
    ))(input)
}

fn escape(input: &str) -> IResult<&str, &str> {
    alt((
        value("\\", tag("\\")),
        value("\"", tag("\"")),
        value("'", tag("'")),
        value("\n", tag("n")),
        value("\t", tag("t")),
    ))(input)
}

fn double_quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(opt(escaped_transform(is_not("\"\\"), '\\', escape)), Option::unwrap_or_default),
        char('"'),
    )(input)
}

fn single_quoted(input: &str) -> IResult<&str, String> {
    delimited(
        char('\''),
        map(opt(escaped_transform(is_not("'\\"), '\\', escape)), Option::unwrap_or_default),
        char('\''),
    )(input)
}

fn string_literal(input: &str) -> IResult<&str, String> {
    alt((double_quoted, single_quoted))(input)
}

fn match_type(input: &str) -> IResult<&str, MatchType> {
    alt((
        value(MatchType::RegexMatch, tag("=~")),
        value(MatchType::RegexNotMatch, tag("!~")),
        value(MatchType::NotEqual, tag("!=")),
        value(MatchType::Equal, tag("=")),
    ))(input)
}

fn label_matcher(input: &str) -> IResult<&str, LabelMatcher> {
    map_res(
        tuple((ws(label_name), ws(match_type), ws(string_literal))),
        |(name, match_type, value)| LabelMatcher::new(match_type, name, value),
    )(input)
}

fn matcher_list(input: &str) -> IResult<&str, Vec<LabelMatcher>> {
    delimited(
        char('{'),
        terminated(separated_list0(ws(char(',')), label_matcher), opt(ws(char(',')))),
        ws(char('}')),
    )(input)
}

fn selector(input: &str) -> IResult<&str, VectorSelector> {
    alt((
        map(pair(metric_identifier, opt(ws(matcher_list))), |(name, matchers)| {
            let mut all = vec![LabelMatcher::metric_name(name)];
            all.extend(matchers.unwrap_or_default());
            VectorSelector { matchers: all }
        }),
        map(matcher_list, |matchers| VectorSelector { matchers }),
    ))(input)
}

fn range(input: &str) -> IResult<&str, Duration> {
    map_opt(
        delimited(ws(char('[')), ws(take_while1(|c: char| c != ']' && !c.is_whitespace())), ws(char(']'))),
        |text: &str| parse_duration(text).filter(|d| !d.is_zero()),
    )(input)
}

fn matrix_selector(input: &str) -> IResult<&str, MatrixSelector> {
    map(pair(ws(selector), range), |(selector, range)| MatrixSelector { selector, range })(input)
}

fn range_or_selector(input: &str) -> IResult<&str, Expr> {
    map(pair(selector, opt(range)), |(selector, range)| match range {
        Some(range) => Expr::Range(MatrixSelector { selector, range }),
        None => Expr::Selector(selector),
    })(input)
}

fn function_name(input: &str) -> IResult<&str, RangeFunction> {
    alt((
        value(RangeFunction::AvgOverTime, tag("avg_over_time")),
        value(RangeFunction::MinOverTime, tag("min_over_time")),
        value(RangeFunction::MaxOverTime, tag("max_over_time")),
        value(RangeFunction::SumOverTime, tag("sum_over_time")),
        value(RangeFunction::CountOverTime, tag("count_over_time")),
        value(RangeFunction::LastOverTime, tag("last_over_time")),
        value(RangeFunction::Increase, tag("increase")),
        value(RangeFunction::Delta, tag("delta")),
        value(RangeFunction::Rate, tag("rate")),
    ))(input)
}

fn call(input: &str) -> IResult<&str, Expr> {
    map(
        pair(
            function_name,
            delimited(ws(char('(')), matrix_selector, ws(char(')'))),
        ),
        |(function, arg)| Expr::Call { function, arg },
    )(input)
}

fn aggregate_op(input: &str) -> IResult<&str, AggregateOp> {
    alt((
        value(AggregateOp::Sum, tag("sum")),
        value(AggregateOp::Avg, tag("avg")),
        value(AggregateOp::Min, tag("min")),
        value(AggregateOp::Max, tag("max")),
        value(AggregateOp::Count, tag("count")),
    ))(input)
}

fn grouping_labels(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        ws(char('(')),
        terminated(
            separated_list0(ws(char(',')), ws(map(label_name, str::to_string))),
            opt(ws(char(','))),
        ),
        ws(char(')')),
    )(input)
}

fn grouping(input: &str) -> IResult<&str, Grouping> {
    ws(alt((
        map(preceded(tag("by"), grouping_labels), Grouping::By),
        map(preceded(tag("without"), grouping_labels), Grouping::Without),
    )))(input)
}

fn aggregate(input: &str) -> IResult<&str, Expr> {
    let (input, op) = aggregate_op(input)?;
    let (input, before) = opt(grouping)(input)?;
    let (input, inner) = delimited(ws(char('(')), expr, ws(char(')')))(input)?;
    let (input, after) = match before {
        Some(_) => (input, None),
        None => opt(grouping)(input)?,
    };

    Ok((
        input,
        Expr::Aggregate {
            op,
            grouping: before.or(after).unwrap_or(Grouping::All),
            expr: Box::new(inner),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn matcher(t: MatchType, name: &str, value: &str) -> LabelMatcher {
        LabelMatcher::new(t, name, value).unwrap()
    }

    #[test]
    fn test_plain_selector() {
        let expr = parse_expr(r#"http_requests_total{job="api", code!~"5.."}"#).unwrap();
        assert_eq!(
            expr,
            Expr::Selector(VectorSelector {
                matchers: vec![
                    LabelMatcher::metric_name("http_requests_total"),
                    matcher(MatchType::Equal, "job", "api"),
                    matcher(MatchType::RegexNotMatch, "code", "5.."),
                ],
            })
        );
    }

    #[test]
    fn test_name_only_and_braces_only() {
        assert!(matches!(parse_expr("up").unwrap(), Expr::Selector(_)));
        let matchers = parse_selector(r#"{__name__="up", env='prod'}"#).unwrap();
        assert_eq!(matchers[0], matcher(MatchType::Equal, METRIC_NAME, "up"));
        assert_eq!(matchers[1], matcher(MatchType::Equal, "env", "prod"));
    }

    #[test]
    fn test_range_and_function() {
        let expr = parse_expr("rate(http_requests_total[5m])").unwrap();
        match expr {
            Expr::Call { function, arg } => {
                assert_eq!(function, RangeFunction::Rate);
                assert_eq!(arg.range, Duration::from_secs(300));
            },
            other => panic!("unexpected {:?}", other),
        }

        let expr = parse_expr("up[1h30m]").unwrap();
        assert!(expr.is_matrix());
    }

    #[test]
    fn test_aggregations() {
        let expr = parse_expr("sum by (job) (rate(requests[1m]))").unwrap();
        match expr {
            Expr::Aggregate { op, grouping, expr } => {
                assert_eq!(op, AggregateOp::Sum);
                assert_eq!(grouping, Grouping::By(vec!["job".into()]));
                assert!(matches!(*expr, Expr::Call { .. }));
            },
            other => panic!("unexpected {:?}", other),
        }

        let expr = parse_expr("max(up) without (instance, pod)").unwrap();
        assert!(matches!(
            expr,
            Expr::Aggregate { op: AggregateOp::Max, grouping: Grouping::Without(ref l), .. } if l.len() == 2
        ));

        let expr = parse_expr("count(up)").unwrap();
        assert!(matches!(expr, Expr::Aggregate { grouping: Grouping::All, .. }));
    }

    #[test]
    fn test_metric_named_like_an_operator() {
        let expr = parse_expr("summary_latency").unwrap();
        assert_eq!(
            expr,
            Expr::Selector(VectorSelector {
                matchers: vec![LabelMatcher::metric_name("summary_latency")],
            })
        );
    }

    #[test]
    fn test_escaped_strings() {
        let matchers = parse_selector(r#"up{path="a\"b"}"#).unwrap();
        assert_eq!(matchers[1].value(), "a\"b");
        let matchers = parse_selector(r#"up{path=""}"#).unwrap();
        assert_eq!(matchers[1].value(), "");
    }

    #[test]
    fn test_rejections() {
        for bad in [
            "",
            "{}",
            r#"{job=""}"#,
            "up[bogus]",
            "up[0s]",
            "rate(up)",
            "up + up",
            r#"up{job=~"("}"#,
            "sum(up",
        ] {
            let err = parse_expr(bad).unwrap_err();
            assert!(err.is_validation(), "{:?} should be rejected", bad);
        }
        assert!(parse_selector("rate(up[1m])").is_err());
    }
}
