use serde::{Deserialize, Serialize};

/// JWT claims issued by the account service. `_id` is the hex user id.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Claims {
    #[serde(rename = "_id")]
    pub id: String,
    pub exp: usize,
}
