//! Static emergency-contacts table. This is reference data, not a feature
//! to design: a node has no way to discover these numbers on the mesh, so
//! they ship hard-coded (spec §6).

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct EmergencyContact {
    pub name: &'static str,
    pub number: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

pub fn contacts() -> Vec<EmergencyContact> {
    vec![
        EmergencyContact {
            name: "UNC Campus Police",
            number: "919-962-8100",
            kind: "police",
        },
        EmergencyContact {
            name: "Chapel Hill Police Dispatch",
            number: "919-968-2760",
            kind: "police",
        },
        EmergencyContact {
            name: "UNC Health ER",
            number: "919-966-4131",
            kind: "medical",
        },
        EmergencyContact {
            name: "Chapel Hill Fire Dept",
            number: "919-968-2784",
            kind: "fire",
        },
        EmergencyContact {
            name: "Orange County 911",
            number: "911",
            kind: "emergency",
        },
        EmergencyContact {
            name: "Duke Energy Outage Line",
            number: "800-769-3766",
            kind: "utility",
        },
        EmergencyContact {
            name: "NC Emergency Management",
            number: "919-825-2500",
            kind: "state",
        },
        EmergencyContact {
            name: "Poison Control",
            number: "800-222-1222",
            kind: "medical",
        },
    ]
}
