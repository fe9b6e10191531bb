use std::collections::BTreeMap;

use petal_core::{MacroHandle, MessageRecord, RenderErrorKind, TplValue};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, FLOAT, INT};

use crate::repeat::RepeatItem;

/// Pre-escaped string marker inside the expression engine; the
/// counterpart of `TplValue::Markup`.
#[derive(Debug, Clone)]
pub struct MarkupDyn(pub String);

/// The default sentinel inside the expression engine.
#[derive(Debug, Clone)]
pub struct DefaultDyn;

#[derive(Debug, Clone)]
pub struct MacroDyn(pub MacroHandle);

#[derive(Debug, Clone)]
pub struct MessageDyn(pub MessageRecord);

pub fn value_to_dynamic(value: &TplValue) -> Dynamic {
    match value {
        TplValue::None => Dynamic::UNIT,
        TplValue::Default => Dynamic::from(DefaultDyn),
        TplValue::Bool(value) => Dynamic::from_bool(*value),
        TplValue::Int(value) => Dynamic::from_int(*value),
        TplValue::Float(value) => Dynamic::from_float(*value as FLOAT),
        TplValue::Str(value) => Dynamic::from(value.clone()),
        TplValue::Markup(value) => Dynamic::from(MarkupDyn(value.clone())),
        TplValue::Array(values) => {
            let mut array = Array::new();
            for value in values {
                array.push(value_to_dynamic(value));
            }
            Dynamic::from_array(array)
        }
        TplValue::Map(values) => {
            let mut map = Map::new();
            for (key, value) in values {
                map.insert(key.clone().into(), value_to_dynamic(value));
            }
            Dynamic::from_map(map)
        }
        TplValue::Message(message) => Dynamic::from(MessageDyn((**message).clone())),
        TplValue::Macro(handle) => Dynamic::from(MacroDyn(handle.clone())),
    }
}

pub fn dynamic_to_value(value: Dynamic) -> Result<TplValue, RenderErrorKind> {
    if value.is_unit() {
        return Ok(TplValue::None);
    }
    if value.is::<bool>() {
        return Ok(TplValue::Bool(value.cast::<bool>()));
    }
    if value.is::<INT>() {
        return Ok(TplValue::Int(value.cast::<INT>()));
    }
    if value.is::<FLOAT>() {
        return Ok(TplValue::Float(value.cast::<FLOAT>()));
    }
    if value.is::<ImmutableString>() {
        return Ok(TplValue::Str(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<char>() {
        return Ok(TplValue::Str(value.cast::<char>().to_string()));
    }
    if value.is::<MarkupDyn>() {
        return Ok(TplValue::Markup(value.cast::<MarkupDyn>().0));
    }
    if value.is::<DefaultDyn>() {
        return Ok(TplValue::Default);
    }
    if value.is::<MacroDyn>() {
        return Ok(TplValue::Macro(value.cast::<MacroDyn>().0));
    }
    if value.is::<MessageDyn>() {
        return Ok(TplValue::Message(Box::new(value.cast::<MessageDyn>().0)));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut out = Vec::with_capacity(array.len());
        for item in array {
            out.push(dynamic_to_value(item)?);
        }
        return Ok(TplValue::Array(out));
    }
    if value.is::<Map>() {
        let map = value.cast::<Map>();
        let mut out = BTreeMap::new();
        for (key, item) in map {
            out.insert(key.to_string(), dynamic_to_value(item)?);
        }
        return Ok(TplValue::Map(out));
    }
    if value.is::<RepeatItem>() {
        let item = value.cast::<RepeatItem>();
        return Ok(TplValue::Int(item.number()));
    }
    Err(RenderErrorKind::Type)
}

/// Map an evaluator failure onto the original-exception kinds the pipe
/// operator understands.
pub fn kind_of_eval_error(error: &EvalAltResult) -> RenderErrorKind {
    match error {
        EvalAltResult::ErrorVariableNotFound(..) | EvalAltResult::ErrorFunctionNotFound(..) => {
            RenderErrorKind::Name
        }
        EvalAltResult::ErrorPropertyNotFound(..) | EvalAltResult::ErrorDotExpr(..) => {
            RenderErrorKind::Attribute
        }
        EvalAltResult::ErrorIndexNotFound(..)
        | EvalAltResult::ErrorArrayBounds(..)
        | EvalAltResult::ErrorStringBounds(..) => RenderErrorKind::Lookup,
        EvalAltResult::ErrorMismatchDataType(..)
        | EvalAltResult::ErrorMismatchOutputType(..)
        | EvalAltResult::ErrorIndexingType(..) => RenderErrorKind::Type,
        EvalAltResult::ErrorArithmetic(..) => RenderErrorKind::Value,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => kind_of_eval_error(inner),
        EvalAltResult::ErrorSystem(..)
        | EvalAltResult::ErrorTerminated(..)
        | EvalAltResult::ErrorStackOverflow(..)
        | EvalAltResult::ErrorDataRace(..) => RenderErrorKind::Internal,
        _ => RenderErrorKind::Other,
    }
}

/// Build the expression engine: strict missing-member failures, the
/// non-redefinable builtins, and the runtime's marker types.
pub fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_fail_on_invalid_map_property(true);

    engine.register_type_with_name::<MarkupDyn>("Markup");
    engine.register_fn("to_string", |markup: &mut MarkupDyn| markup.0.clone());

    engine.register_type_with_name::<DefaultDyn>("Default");
    engine.register_type_with_name::<MacroDyn>("MacroRef");

    engine.register_type_with_name::<MessageDyn>("Message");
    engine.register_get("msgid", |message: &mut MessageDyn| message.0.msgid.clone());

    engine.register_type_with_name::<RepeatItem>("RepeatItem");
    engine.register_get("index", |item: &mut RepeatItem| item.index as INT);
    engine.register_get("number", |item: &mut RepeatItem| item.number());
    engine.register_get("length", |item: &mut RepeatItem| item.length as INT);
    engine.register_get("even", |item: &mut RepeatItem| item.even());
    engine.register_get("odd", |item: &mut RepeatItem| item.odd());
    engine.register_get("parity", |item: &mut RepeatItem| item.parity().to_string());
    engine.register_get("start", |item: &mut RepeatItem| item.start());
    engine.register_get("end", |item: &mut RepeatItem| item.end());
    engine.register_get("first", |item: &mut RepeatItem| item.first(""));
    engine.register_get("last", |item: &mut RepeatItem| item.last(""));
    engine.register_get("letter", |item: &mut RepeatItem| item.letter());
    engine.register_get("Letter", |item: &mut RepeatItem| item.letter_upper());
    engine.register_get("roman", |item: &mut RepeatItem| item.roman());
    engine.register_get("Roman", |item: &mut RepeatItem| item.roman_upper());
    engine.register_fn("first", |item: &mut RepeatItem, key: &str| item.first(key));
    engine.register_fn("last", |item: &mut RepeatItem, key: &str| item.last(key));

    engine.register_fn("len", |value: Dynamic| -> Result<INT, Box<EvalAltResult>> {
        if value.is::<Array>() {
            return Ok(value.cast::<Array>().len() as INT);
        }
        if value.is::<Map>() {
            return Ok(value.cast::<Map>().len() as INT);
        }
        if value.is::<ImmutableString>() {
            return Ok(value.cast::<ImmutableString>().chars().count() as INT);
        }
        Err(Box::new(EvalAltResult::ErrorMismatchDataType(
            "array, map or string".to_string(),
            value.type_name().to_string(),
            rhai::Position::NONE,
        )))
    });

    engine.register_fn("int", |value: Dynamic| -> Result<INT, Box<EvalAltResult>> {
        if value.is::<INT>() {
            return Ok(value.cast::<INT>());
        }
        if value.is::<FLOAT>() {
            return Ok(value.cast::<FLOAT>() as INT);
        }
        if value.is::<bool>() {
            return Ok(INT::from(value.cast::<bool>()));
        }
        if value.is::<ImmutableString>() {
            let text = value.cast::<ImmutableString>();
            return text.trim().parse::<INT>().map_err(|_| {
                Box::new(EvalAltResult::ErrorMismatchDataType(
                    "integer text".to_string(),
                    format!("\"{}\"", text),
                    rhai::Position::NONE,
                ))
            });
        }
        Err(Box::new(EvalAltResult::ErrorMismatchDataType(
            "number".to_string(),
            value.type_name().to_string(),
            rhai::Position::NONE,
        )))
    });

    engine.register_fn(
        "float",
        |value: Dynamic| -> Result<FLOAT, Box<EvalAltResult>> {
            if value.is::<FLOAT>() {
                return Ok(value.cast::<FLOAT>());
            }
            if value.is::<INT>() {
                return Ok(value.cast::<INT>() as FLOAT);
            }
            if value.is::<ImmutableString>() {
                let text = value.cast::<ImmutableString>();
                return text.trim().parse::<FLOAT>().map_err(|_| {
                    Box::new(EvalAltResult::ErrorMismatchDataType(
                        "float text".to_string(),
                        format!("\"{}\"", text),
                        rhai::Position::NONE,
                    ))
                });
            }
            Err(Box::new(EvalAltResult::ErrorMismatchDataType(
                "number".to_string(),
                value.type_name().to_string(),
                rhai::Position::NONE,
            )))
        },
    );

    engine.register_fn("range", |count: INT| -> Array {
        (0..count.max(0)).map(Dynamic::from_int).collect()
    });
    engine.register_fn("range", |start: INT, end: INT| -> Array {
        (start..end.max(start)).map(Dynamic::from_int).collect()
    });
    engine.register_fn("str", |value: Dynamic| -> String {
        match dynamic_to_value(value) {
            Ok(converted) => converted.to_text(),
            Err(_) => String::new(),
        }
    });

    engine
}
