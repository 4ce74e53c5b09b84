//! Read-only directory listing contract
//!
//! Stations contain gates, gates carry streams. The player only reads
//! these listings to resolve a stream id; management of the directory
//! itself belongs to the service.

use serde::{Deserialize, Serialize};

use super::ApiClient;
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub station_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub gate_id: String,
    pub station_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub stream_id: String,
    pub gate_id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct StationListResponse {
    stations: Vec<Station>,
}

#[derive(Debug, Deserialize)]
struct GateListResponse {
    gates: Vec<Gate>,
}

#[derive(Debug, Deserialize)]
struct StreamListResponse {
    streams: Vec<Stream>,
}

impl ApiClient {
    /// `GET /v1/stations`
    pub async fn stations(&self) -> Result<Vec<Station>> {
        let resp: StationListResponse = self.get_json("/v1/stations").await?;
        Ok(resp.stations)
    }

    /// `GET /v1/stations/{id}/gates`
    pub async fn station_gates(&self, station_id: &str) -> Result<Vec<Gate>> {
        let resp: GateListResponse = self
            .get_json(&format!("/v1/stations/{}/gates", station_id))
            .await?;
        Ok(resp.gates)
    }

    /// `GET /v1/gates/{id}/streams`
    pub async fn gate_streams(&self, gate_id: &str) -> Result<Vec<Stream>> {
        let resp: StreamListResponse = self
            .get_json(&format!("/v1/gates/{}/streams", gate_id))
            .await?;
        Ok(resp.streams)
    }
}
