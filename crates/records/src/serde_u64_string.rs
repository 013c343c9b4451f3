use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum U64Input {
        String(String),
        Number(u64),
    }

    match U64Input::deserialize(deserializer)? {
        U64Input::String(raw) => raw.parse::<u64>().map_err(D::Error::custom),
        U64Input::Number(value) => Ok(value),
    }
}

pub mod option {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_some(&value.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum U64Input {
            String(String),
            Number(u64),
        }

        match Option::<U64Input>::deserialize(deserializer)? {
            None => Ok(None),
            Some(U64Input::Number(value)) => Ok(Some(value)),
            Some(U64Input::String(raw)) => raw.parse::<u64>().map(Some).map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Wrapper {
        #[serde(with = "super")]
        user_id: u64,
        #[serde(default, with = "super::option")]
        peer_id: Option<u64>,
    }

    #[test]
    fn deserialize_accepts_string() {
        let parsed: Wrapper =
            serde_json::from_str(r#"{"user_id":"1337"}"#).expect("string user id");
        assert_eq!(parsed.user_id, 1337);
        assert_eq!(parsed.peer_id, None);
    }

    #[test]
    fn deserialize_accepts_number() {
        let parsed: Wrapper =
            serde_json::from_str(r#"{"user_id":1337,"peer_id":7}"#).expect("numeric user id");
        assert_eq!(parsed.user_id, 1337);
        assert_eq!(parsed.peer_id, Some(7));
    }

    #[test]
    fn serialize_emits_strings() {
        let json = serde_json::to_string(&Wrapper {
            user_id: 919238479238479238,
            peer_id: Some(3),
        })
        .expect("serializes");
        assert_eq!(json, r#"{"user_id":"919238479238479238","peer_id":"3"}"#);
    }
}
