//! DAMA control messages and their wire codec

use serde::{Deserialize, Serialize};

use crate::sac::SacField;
use crate::{
    CoreError, FmtId, FrameNumber, GroupId, RateKbps, RequestKind, SuperframeNumber, TerminalId, VolumeKb,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogonRequest {
    pub terminal_id: TerminalId,
    pub cra_kbps: RateKbps,
    pub max_rbdc_kbps: RateKbps,
    pub max_vbdc_kb: VolumeKb,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogonResponse {
    pub group_id: GroupId,
    pub terminal_id: TerminalId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Logoff {
    pub terminal_id: TerminalId,
}

/// Capacity request as seen by the agent and the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityRequest {
    pub terminal_id: TerminalId,
    pub group_id: GroupId,
    pub requests: Vec<(RequestKind, u32)>,
    /// Downlink C/N measured by the terminal, in dB.
    pub cni_db: Option<f64>,
}

impl CapacityRequest {
    pub fn new(terminal_id: TerminalId, group_id: GroupId) -> Self {
        Self {
            terminal_id,
            group_id,
            requests: Vec::new(),
            cni_db: None,
        }
    }

    pub fn add(&mut self, kind: RequestKind, value: u32) {
        self.requests.push((kind, value));
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn value(&self, kind: RequestKind) -> Option<u32> {
        self.requests
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, value)| *value)
    }

    /// Encode every value into its SAC field.
    pub fn to_sac(&self) -> SacFrame {
        SacFrame {
            terminal_id: self.terminal_id,
            group_id: self.group_id,
            cni_db: self.cni_db,
            fields: self
                .requests
                .iter()
                .map(|(kind, value)| (*kind, SacField::encode(*kind, *value)))
                .collect(),
        }
    }
}

/// Capacity request in its on-air form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SacFrame {
    pub terminal_id: TerminalId,
    pub group_id: GroupId,
    pub cni_db: Option<f64>,
    pub fields: Vec<(RequestKind, SacField)>,
}

impl SacFrame {
    pub fn to_request(&self) -> CapacityRequest {
        CapacityRequest {
            terminal_id: self.terminal_id,
            group_id: self.group_id,
            cni_db: self.cni_db,
            requests: self
                .fields
                .iter()
                .map(|(kind, field)| (*kind, field.decode(*kind)))
                .collect(),
        }
    }
}

/// One assignment of a time plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePlan {
    pub terminal_id: TerminalId,
    pub frame: FrameNumber,
    pub offset: u16,
    /// Packets granted per frame.
    pub assignment_count: u32,
    pub fmt_id: FmtId,
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeTranslationPlan {
    pub group_id: GroupId,
    pub superframe: SuperframeNumber,
    pub plans: Vec<TimePlan>,
}

impl TimeTranslationPlan {
    pub fn new(group_id: GroupId, superframe: SuperframeNumber) -> Self {
        Self {
            group_id,
            superframe,
            plans: Vec::new(),
        }
    }

    pub fn add(&mut self, plan: TimePlan) {
        self.plans.push(plan);
    }

    pub fn plans_for(&self, terminal_id: TerminalId) -> impl Iterator<Item = &TimePlan> {
        self.plans.iter().filter(move |plan| plan.terminal_id == terminal_id)
    }
}

/// Envelope of every message exchanged between agents and the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DamaMessage {
    LogonRequest(LogonRequest),
    LogonResponse(LogonResponse),
    Logoff(Logoff),
    CapacityRequest(SacFrame),
    TimePlan(TimeTranslationPlan),
}

impl DamaMessage {
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| CoreError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        let (message, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| CoreError::Codec(e.to_string()))?;
        if read != bytes.len() {
            return Err(CoreError::Codec(format!(
                "{} trailing bytes after message",
                bytes.len() - read
            )));
        }
        Ok(message)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DamaMessage::LogonRequest(_) => "logon request",
            DamaMessage::LogonResponse(_) => "logon response",
            DamaMessage::Logoff(_) => "logoff",
            DamaMessage::CapacityRequest(_) => "capacity request",
            DamaMessage::TimePlan(_) => "time plan",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_request_through_sac() {
        let mut request = CapacityRequest::new(4, 1);
        request.add(RequestKind::RateBased, 5000);
        request.add(RequestKind::VolumeBased, 12);
        request.cni_db = Some(7.5);

        let bytes = DamaMessage::CapacityRequest(request.to_sac()).encode().unwrap();
        let decoded = match DamaMessage::decode(&bytes).unwrap() {
            DamaMessage::CapacityRequest(sac) => sac.to_request(),
            other => panic!("unexpected {}", other.name()),
        };
        assert_eq!(decoded.terminal_id, 4);
        assert_eq!(decoded.value(RequestKind::RateBased), Some(4992));
        assert_eq!(decoded.value(RequestKind::VolumeBased), Some(12));
        assert_eq!(decoded.cni_db, Some(7.5));
    }

    #[test]
    fn test_time_plan_lookup() {
        let mut ttp = TimeTranslationPlan::new(1, 42);
        for terminal_id in [3u16, 5, 3] {
            ttp.add(TimePlan {
                terminal_id,
                frame: 0,
                offset: 0,
                assignment_count: 10,
                fmt_id: 2,
                priority: 0,
            });
        }
        assert_eq!(ttp.plans_for(3).count(), 2);
        assert_eq!(ttp.plans_for(9).count(), 0);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(DamaMessage::decode(&[0xff, 0xff, 0xff]), Err(CoreError::Codec(_))));
        let bytes = DamaMessage::Logoff(Logoff { terminal_id: 2 }).encode().unwrap();
        let mut padded = bytes.clone();
        padded.push(0);
        assert!(DamaMessage::decode(&padded).is_err());
        assert_eq!(
            DamaMessage::decode(&bytes).unwrap(),
            DamaMessage::Logoff(Logoff { terminal_id: 2 })
        );
    }
}
