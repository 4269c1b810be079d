//! 宽松反序列化辅助函数
//!
//! LLM 和手工整理的输入文件经常把数字写成字符串（或反过来），这里统一兼容。

use serde::de::{self, Visitor};
use serde::Deserializer;
use std::fmt;

/// 将字符串或整数反序列化为 String（用于受访者 ID）
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct IdVisitor;

    impl<'de> Visitor<'de> for IdVisitor {
        type Value = String;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or integer identifier")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().to_string())
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.to_string())
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if value.fract() == 0.0 {
                Ok(format!("{}", value as i64))
            } else {
                Ok(value.to_string())
            }
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

/// 将数字、数字字符串或 null 反序列化为 `Option<i64>`（用于编码与回复中的 ID）
///
/// 无法识别的字符串视为缺失，而不是报错。
pub fn deserialize_opt_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct NumberVisitor;

    impl<'de> Visitor<'de> for NumberVisitor {
        type Value = Option<i64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an integer, a numeric string or null")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D2>(self, deserializer: D2) -> Result<Self::Value, D2::Error>
        where
            D2: Deserializer<'de>,
        {
            deserializer.deserialize_any(NumberVisitor)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(i64::try_from(value).ok())
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if value.is_finite() && value.fract() == 0.0 {
                Ok(Some(value as i64))
            } else {
                Ok(None)
            }
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse().ok())
        }
    }

    deserializer.deserialize_any(NumberVisitor)
}

/// 将数字或数字字符串反序列化为 i64，缺失或无法识别时报错
pub fn deserialize_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_opt_number(deserializer)?
        .ok_or_else(|| de::Error::custom("expected an integer code"))
}

/// 将布尔值、"true"/"false"/"si"/"no" 字符串反序列化为 bool
pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a boolean or a yes/no string")
        }

        fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value != 0)
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value != 0)
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            match value.trim().to_lowercase().as_str() {
                "true" | "si" | "sí" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                other => Err(de::Error::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "deserialize_id")]
        id: String,
        #[serde(default, deserialize_with = "deserialize_opt_number")]
        code: Option<i64>,
        #[serde(default = "yes", deserialize_with = "deserialize_flag")]
        flag: bool,
    }

    fn yes() -> bool {
        true
    }

    #[test]
    fn test_numbers_and_strings_are_interchangeable() {
        let probe: Probe = serde_json::from_str(r#"{"id": 17, "code": "48", "flag": "no"}"#).unwrap();
        assert_eq!(probe.id, "17");
        assert_eq!(probe.code, Some(48));
        assert!(!probe.flag);

        let probe: Probe = serde_json::from_str(r#"{"id": "A-3", "code": null}"#).unwrap();
        assert_eq!(probe.id, "A-3");
        assert_eq!(probe.code, None);
        assert!(probe.flag);
    }

    #[test]
    fn test_unparseable_code_becomes_none() {
        let probe: Probe = serde_json::from_str(r#"{"id": 1, "code": "nuevo"}"#).unwrap();
        assert_eq!(probe.code, None);
    }
}
