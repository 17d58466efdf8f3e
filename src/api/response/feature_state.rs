use serde::Deserialize;

#[derive(Deserialize)]
pub struct FeatureState {
    pub result: bool,
}
