//! Parse layout description source into a [`LayoutFile`] using PEST.

use crate::ast::*;
use crate::error::Error;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct LayoutParser;

type Pair<'i> = pest::iterators::Pair<'i, Rule>;

/// Parse layout source into its syntax tree. Nothing is validated beyond the
/// grammar; see [`LayoutFile::install`].
pub fn parse(source: &str) -> Result<LayoutFile, Error> {
    let pairs = LayoutParser::parse(Rule::file, source).map_err(|e| Error::Parse(e.to_string()))?;
    let pair = pairs.into_iter().next().ok_or_else(|| Error::Parse("empty parse".to_string()))?;
    build_file(pair).map_err(Error::Parse)
}

fn build_file(pair: Pair) -> Result<LayoutFile, String> {
    let mut file = LayoutFile::default();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::layout_section => file.layouts.push(build_layout(inner)?),
            Rule::map_section => file.maps.push(build_map(inner)?),
            _ => {}
        }
    }
    Ok(file)
}

fn build_layout(pair: Pair) -> Result<LayoutDef, String> {
    let mut name = String::new();
    let mut description = None;
    let mut fields = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::string_literal => description = Some(unquote(inner.as_str())),
            Rule::field_decl => fields.push(build_field(inner)?),
            _ => {}
        }
    }
    if name.is_empty() {
        return Err("layout: missing name".to_string());
    }
    Ok(LayoutDef {
        name,
        description,
        fields,
    })
}

fn build_field(pair: Pair) -> Result<FieldDef, String> {
    let mut name = String::new();
    let mut type_spec = None;
    let mut default = None;
    let mut discriminator = false;
    let mut wildcard = false;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => name = inner.as_str().to_string(),
            Rule::type_spec => type_spec = Some(build_type_spec(inner)?),
            Rule::default_spec => {
                let lit = inner.into_inner().next().ok_or("default: missing literal")?;
                default = Some(parse_literal(lit.as_str())?);
            }
            Rule::modifier => match inner.as_str() {
                "discriminator" => discriminator = true,
                "wildcard" => wildcard = true,
                other => return Err(format!("unknown modifier: {}", other)),
            },
            _ => {}
        }
    }
    Ok(FieldDef {
        type_spec: type_spec.ok_or_else(|| format!("{}: missing type", name))?,
        name,
        default,
        discriminator,
        wildcard,
    })
}

fn build_type_spec(pair: Pair) -> Result<TypeSpec, String> {
    let inner = pair.into_inner().next().ok_or("empty type")?;
    match inner.as_rule() {
        Rule::bits_type => Ok(TypeSpec::Bits(first_number(inner, "bits(n)")?)),
        Rule::int_type => match inner.as_str() {
            "u8" => Ok(TypeSpec::Bits(8)),
            "u16" => Ok(TypeSpec::Bits(16)),
            "u32" => Ok(TypeSpec::Bits(32)),
            "u64" => Ok(TypeSpec::Bits(64)),
            other => Err(format!("unknown integer type: {}", other)),
        },
        Rule::bytes_sized => Ok(TypeSpec::Bytes(Some(first_number(inner, "bytes(n)")?))),
        Rule::bytes_rest => Ok(TypeSpec::Bytes(None)),
        Rule::lv_type => {
            let mut it = inner.into_inner();
            let length = build_type_spec(it.next().ok_or("lv: missing length type")?)?;
            let value = build_type_spec(it.next().ok_or("lv: missing value type")?)?;
            Ok(TypeSpec::Lv(Box::new(length), Box::new(value)))
        }
        Rule::tv_type => {
            let mut it = inner.into_inner();
            let ty = build_type_spec(it.next().ok_or("tv: missing type type")?)?;
            let value = build_type_spec(it.next().ok_or("tv: missing value type")?)?;
            Ok(TypeSpec::Tv(Box::new(ty), Box::new(value)))
        }
        Rule::tlv_type => {
            let mut specs = Vec::new();
            let mut exclusive = false;
            let mut bitwise = false;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::type_spec => specs.push(build_type_spec(part)?),
                    Rule::tlv_flag => match part.as_str() {
                        "exclusive" => exclusive = true,
                        _ => bitwise = true,
                    },
                    _ => {}
                }
            }
            let [ty, length, value]: [TypeSpec; 3] = specs
                .try_into()
                .map_err(|_| "tlv needs type, length and value".to_string())?;
            Ok(TypeSpec::Tlv {
                ty: Box::new(ty),
                length: Box::new(length),
                value: Box::new(value),
                exclusive,
                bitwise,
            })
        }
        Rule::options_type => Ok(TypeSpec::Options),
        other => Err(format!("unhandled type rule: {:?}", other)),
    }
}

fn build_map(pair: Pair) -> Result<MapDef, String> {
    let mut protocol = String::new();
    let mut entries = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => protocol = inner.as_str().to_string(),
            Rule::map_entry => {
                let mut it = inner.into_inner();
                let lit = it.next().ok_or("map entry: value")?;
                let value = parse_literal(lit.as_str())?
                    .as_u64()
                    .ok_or_else(|| format!("map {}: {} is not an integer", protocol, lit.as_str()))?;
                let target = it.next().ok_or("map entry: protocol")?;
                entries.push((value, target.as_str().to_string()));
            }
            _ => {}
        }
    }
    Ok(MapDef { protocol, entries })
}

fn first_number(pair: Pair, what: &str) -> Result<u32, String> {
    pair.into_inner()
        .next()
        .and_then(|p| p.as_str().parse().ok())
        .ok_or_else(|| format!("{} needs a number", what))
}

fn unquote(s: &str) -> String {
    let inner = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s);
    inner
        .replace("\\\"", "\"")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
        .replace("\\\\", "\\")
}

fn parse_literal(s: &str) -> Result<Literal, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16)
            .map(Literal::Hex)
            .map_err(|_| format!("hex literal out of range: {}", s));
    }
    if s.starts_with('"') {
        return Ok(Literal::String(unquote(s)));
    }
    s.parse::<u64>()
        .map(Literal::Int)
        .map_err(|_| format!("integer literal out of range: {}", s))
}
