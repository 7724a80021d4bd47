use std::collections::HashSet;

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use super::types::{PermitDef, PermitRule, RelationDef, Schema, SubjectTypeRef, TypeDefinition};

#[derive(Parser)]
#[grammar = "schema/grammar.pest"]
struct SchemaParser;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("mixed operators in permit expression: group with parentheses to combine +, &, -")]
    MixedOperators,
    #[error("exclusion (-) supports exactly two operands: base - excluded")]
    MultipleExclusions,
    #[error("duplicate type: {0}")]
    DuplicateType(String),
    #[error("duplicate relation '{relation}' in type '{type_name}'")]
    DuplicateRelation { type_name: String, relation: String },
    #[error("duplicate permit '{permit}' in type '{type_name}'")]
    DuplicatePermit { type_name: String, permit: String },
    #[error("permit '{name}' in type '{type_name}' shadows a relation of the same name")]
    PermitShadowsRelation { type_name: String, name: String },
}

pub fn parse_schema(input: &str) -> Result<Schema, ParseError> {
    let pairs =
        SchemaParser::parse(Rule::schema, input).map_err(|e| ParseError::Syntax(e.to_string()))?;

    let mut types = Vec::new();
    let mut seen_types = HashSet::new();

    for pair in pairs {
        if pair.as_rule() != Rule::schema {
            continue;
        }
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::definition {
                let type_def = parse_definition(inner)?;
                if !seen_types.insert(type_def.name.clone()) {
                    return Err(ParseError::DuplicateType(type_def.name));
                }
                types.push(type_def);
            }
        }
    }

    Ok(Schema { types })
}

fn unexpected_rule(rule: Rule) -> ParseError {
    ParseError::Syntax(format!("unexpected rule: {rule:?}"))
}

fn missing_token(context: &str) -> ParseError {
    ParseError::Syntax(format!("missing token: {context}"))
}

fn next_identifier(
    inner: &mut pest::iterators::Pairs<'_, Rule>,
    context: &str,
) -> Result<String, ParseError> {
    Ok(inner
        .next()
        .ok_or_else(|| missing_token(context))?
        .as_str()
        .to_string())
}

fn parse_definition(pair: Pair<'_, Rule>) -> Result<TypeDefinition, ParseError> {
    let mut inner = pair.into_inner();
    let name = next_identifier(&mut inner, "definition name")?;
    let body = inner
        .next()
        .ok_or_else(|| missing_token("definition body"))?;

    let mut relations = Vec::new();
    let mut permits: Vec<PermitDef> = Vec::new();
    let mut seen_relations = HashSet::new();
    let mut seen_permits = HashSet::new();

    for item in body.into_inner() {
        match item.as_rule() {
            Rule::relation_def => {
                let rel = parse_relation_def(item)?;
                if !seen_relations.insert(rel.name.clone()) {
                    return Err(ParseError::DuplicateRelation {
                        type_name: name,
                        relation: rel.name,
                    });
                }
                relations.push(rel);
            }
            Rule::permit_def => {
                let permit = parse_permit_def(item)?;
                if !seen_permits.insert(permit.name.clone()) {
                    return Err(ParseError::DuplicatePermit {
                        type_name: name,
                        permit: permit.name,
                    });
                }
                permits.push(permit);
            }
            other => return Err(unexpected_rule(other)),
        }
    }

    // Relations may be declared after the permits that use them, so the
    // shared namespace is only checked once the whole body is read.
    if let Some(shadowing) = permits.iter().find(|p| seen_relations.contains(&p.name)) {
        return Err(ParseError::PermitShadowsRelation {
            type_name: name,
            name: shadowing.name.clone(),
        });
    }

    Ok(TypeDefinition {
        name,
        relations,
        permits,
    })
}

fn parse_relation_def(pair: Pair<'_, Rule>) -> Result<RelationDef, ParseError> {
    let mut inner = pair.into_inner();
    let name = next_identifier(&mut inner, "relation name")?;
    let subject_type_list = inner
        .next()
        .ok_or_else(|| missing_token("subject type list"))?;

    let subject_types = subject_type_list
        .into_inner()
        .map(parse_subject_type_ref)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RelationDef {
        name,
        subject_types,
    })
}

fn parse_subject_type_ref(pair: Pair<'_, Rule>) -> Result<SubjectTypeRef, ParseError> {
    let mut inner = pair.into_inner();
    let type_name = next_identifier(&mut inner, "subject type name")?;
    let relation = inner.next().map(|p| p.as_str().to_string());

    Ok(SubjectTypeRef {
        type_name,
        relation,
    })
}

fn parse_permit_def(pair: Pair<'_, Rule>) -> Result<PermitDef, ParseError> {
    let mut inner = pair.into_inner();
    let name = next_identifier(&mut inner, "permit name")?;
    let rule = match inner.next() {
        Some(expr) => parse_permit_expr(expr)?,
        None => PermitRule::Union(Vec::new()),
    };

    Ok(PermitDef { name, rule })
}

fn parse_permit_expr(pair: Pair<'_, Rule>) -> Result<PermitRule, ParseError> {
    let mut inner = pair.into_inner();
    let first = parse_permit_term(inner.next().ok_or_else(|| missing_token("permit term"))?)?;

    let mut ops_and_terms: Vec<(Rule, PermitRule)> = Vec::new();

    while let Some(op) = inner.next() {
        let term = parse_permit_term(
            inner
                .next()
                .ok_or_else(|| missing_token("permit term after operator"))?,
        )?;
        ops_and_terms.push((op.as_rule(), term));
    }

    let Some(&(first_op, _)) = ops_and_terms.first() else {
        return Ok(first);
    };

    if ops_and_terms.iter().any(|(op, _)| *op != first_op) {
        return Err(ParseError::MixedOperators);
    }

    let mut operands = vec![first];
    operands.extend(ops_and_terms.into_iter().map(|(_, t)| t));

    match first_op {
        Rule::union_op => Ok(PermitRule::Union(operands)),
        Rule::intersection_op => Ok(PermitRule::Intersection(operands)),
        Rule::exclusion_op => {
            let [base, excluded]: [PermitRule; 2] = operands
                .try_into()
                .map_err(|_| ParseError::MultipleExclusions)?;
            Ok(PermitRule::Exclusion(Box::new(base), Box::new(excluded)))
        }
        other => Err(unexpected_rule(other)),
    }
}

fn parse_permit_term(pair: Pair<'_, Rule>) -> Result<PermitRule, ParseError> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| missing_token("permit term content"))?;
    match inner.as_rule() {
        Rule::traverse_expr => {
            let mut parts = inner.into_inner();
            let relation = next_identifier(&mut parts, "traversal relation")?;
            let permit = next_identifier(&mut parts, "traversal permit")?;
            Ok(PermitRule::Traverse(relation, permit))
        }
        Rule::group_expr => {
            let expr = inner
                .into_inner()
                .next()
                .ok_or_else(|| missing_token("grouped expression"))?;
            parse_permit_expr(expr)
        }
        Rule::identifier => Ok(PermitRule::Name(inner.as_str().to_string())),
        other => Err(unexpected_rule(other)),
    }
}
