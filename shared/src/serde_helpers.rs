//! Wire representations for BSON types.
//!
//! Stored documents keep native `ObjectId`/`DateTime` values; everything that
//! goes over HTTP or the websocket uses hex ids and RFC 3339 timestamps.

pub mod object_id {
    use bson::oid::ObjectId;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &ObjectId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<ObjectId, D::Error> {
        let hex = String::deserialize(deserializer)?;

        ObjectId::parse_str(&hex).map_err(D::Error::custom)
    }
}

pub mod option_object_id {
    use bson::oid::ObjectId;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        id: &Option<ObjectId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_some(&id.to_hex()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ObjectId>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|hex| ObjectId::parse_str(&hex).map_err(D::Error::custom))
            .transpose()
    }
}

pub mod object_ids {
    use bson::oid::ObjectId;
    use serde::{de::Error, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ids: &[ObjectId], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(ids.len()))?;

        for id in ids {
            seq.serialize_element(&id.to_hex())?;
        }

        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<ObjectId>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|hex| ObjectId::parse_str(hex).map_err(D::Error::custom))
            .collect()
    }
}

pub mod datetime {
    use bson::DateTime;
    use serde::{de::Error, ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = dt
            .try_to_rfc3339_string()
            .map_err(<S::Error as ser::Error>::custom)?;

        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime, D::Error> {
        let formatted = String::deserialize(deserializer)?;

        DateTime::parse_rfc3339_str(&formatted).map_err(D::Error::custom)
    }
}
