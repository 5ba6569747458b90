//! Deterministic local replies
//!
//! Last step of the fallback chain. Replies come from small per-kind
//! template sets: a keyword topic if one matches, otherwise a generic reply
//! picked by hashing `(agent_id, body)`. Same input, same output.

use sha2::{Digest, Sha256};

/// Broad family of an agent, inferred from its id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Healthcare,
    Financial,
    Logistics,
    General,
}

impl AgentKind {
    pub fn classify(agent_id: &str) -> Self {
        let id = agent_id.to_lowercase();
        if id.contains("health") || id.contains("medical") {
            Self::Healthcare
        } else if id.contains("financ") || id.contains("defi") {
            Self::Financial
        } else if id.contains("logistic") || id.contains("supply") {
            Self::Logistics
        } else {
            Self::General
        }
    }

    /// Name the relay expects in `agentType`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthcare => "healthcare",
            Self::Financial => "financial",
            Self::Logistics => "logistics",
            Self::General => "general",
        }
    }

    fn topics(&self) -> &'static [Topic] {
        match self {
            Self::Healthcare => HEALTHCARE_TOPICS,
            Self::Financial => FINANCIAL_TOPICS,
            Self::Logistics => LOGISTICS_TOPICS,
            Self::General => &[],
        }
    }

    fn generic(&self) -> &'static [&'static str] {
        match self {
            Self::Healthcare => HEALTHCARE_GENERIC,
            Self::Financial => FINANCIAL_GENERIC,
            Self::Logistics => LOGISTICS_GENERIC,
            Self::General => GENERAL_GENERIC,
        }
    }
}

struct Topic {
    keywords: &'static [&'static str],
    reply: &'static str,
}

const HEALTHCARE_TOPICS: &[Topic] = &[
    Topic {
        keywords: &["headache", "migraine", "head", "pain"],
        reply: "Headaches often come from stress, dehydration, poor sleep or muscle tension. \
                Drink water, rest somewhere quiet and dark, and consider a cold compress. \
                If the headache is severe, lasts several days, or comes with vision changes \
                or nausea, please see a healthcare professional.",
    },
    Topic {
        keywords: &["blood pressure", "hypertension"],
        reply: "For blood pressure, cut back on salt, stay active most days, limit alcohol \
                and keep an eye on your weight. Readings that stay high need a doctor's \
                review, as treatment often includes medication.",
    },
    Topic {
        keywords: &["anxious", "anxiety", "stress", "stressed"],
        reply: "Slow breathing, regular sleep, light exercise and less caffeine all help with \
                anxiety. If it is getting in the way of daily life, a mental health \
                professional can offer treatment that fits you.",
    },
    Topic {
        keywords: &["diabetes", "glucose", "sugar"],
        reply: "Common signs of diabetes include thirst, frequent urination, tiredness and \
                blurred vision. Only a blood test can confirm it, so please ask your doctor \
                for one if these sound familiar.",
    },
    Topic {
        keywords: &["sleep", "insomnia", "tired", "fatigue"],
        reply: "Keep a steady sleep schedule, avoid screens for an hour before bed and skip \
                caffeine in the afternoon. If poor sleep continues, a doctor can check for \
                conditions such as sleep apnea.",
    },
];

const HEALTHCARE_GENERIC: &[&str] = &[
    "I can share general health guidance, but I am not a substitute for a medical \
     professional. Could you describe your symptoms in a bit more detail?",
    "Thanks for reaching out about your health. Tell me more about what you are \
     experiencing and for how long, and I will share what may help.",
];

const FINANCIAL_TOPICS: &[Topic] = &[
    Topic {
        keywords: &["bitcoin", "btc", "crypto", "cryptocurrency"],
        reply: "Crypto assets are highly volatile. Only invest what you can afford to lose, \
                keep it to a small share of a diversified portfolio, and consider buying in \
                regular small amounts rather than all at once.",
    },
    Topic {
        keywords: &["defi", "yield", "staking", "liquidity"],
        reply: "DeFi yields come with smart contract risk and, for liquidity pools, \
                impermanent loss. Prefer audited, well-established protocols and spread \
                funds across more than one.",
    },
    Topic {
        keywords: &["portfolio", "diversify", "invest", "investment"],
        reply: "Diversify across asset classes and regions, rebalance periodically, and match \
                your allocation to your risk tolerance and time horizon. Low-cost index funds \
                are a solid core for most portfolios.",
    },
];

const FINANCIAL_GENERIC: &[&str] = &[
    "I can help with investment strategy, portfolio review and DeFi questions. Every \
     investment carries risk, so tell me more about your goals and horizon.",
    "Happy to help with your finances. What are you trying to achieve, and how much risk \
     are you comfortable with?",
];

const LOGISTICS_TOPICS: &[Topic] = &[
    Topic {
        keywords: &["route", "delivery", "shipping", "optimization"],
        reply: "Group deliveries by area, plan around peak traffic and re-route on live \
                conditions. Track fuel and vehicle load so savings show up in the numbers.",
    },
    Topic {
        keywords: &["inventory", "stock", "warehouse", "storage"],
        reply: "Forecast demand, keep safety stock for critical items and run regular cycle \
                counts. An ABC analysis shows where tighter control pays off most.",
    },
    Topic {
        keywords: &["supply chain", "supplier", "vendor", "procurement"],
        reply: "Spread risk across more than one supplier, agree clear quality checks, and \
                share demand forecasts with vendors so they can plan ahead.",
    },
];

const LOGISTICS_GENERIC: &[&str] = &[
    "I can help with routing, inventory and supply chain planning. What does your current \
     operation look like?",
    "Tell me more about the logistics problem you are facing and I will suggest where to \
     start.",
];

const GENERAL_GENERIC: &[&str] = &[
    "I am here to help. Could you give me a little more detail about what you need?",
    "Thanks for your message. Tell me more and I will do my best to assist.",
    "Got it. What would be the most useful next step for you?",
];

/// Template-based reply generator
#[derive(Debug, Clone, Copy, Default)]
pub struct Simulator;

impl Simulator {
    pub fn new() -> Self {
        Self
    }

    /// Reply to `body` as `agent_id` would
    pub fn reply(&self, agent_id: &str, body: &str) -> String {
        let kind = AgentKind::classify(agent_id);
        let text = body.to_lowercase();

        let topic = kind
            .topics()
            .iter()
            .find(|topic| topic.keywords.iter().any(|keyword| text.contains(keyword)));
        if let Some(topic) = topic {
            return topic.reply.to_string();
        }

        let generic = kind.generic();
        let index = (seed(agent_id, body) % generic.len() as u64) as usize;
        generic[index].to_string()
    }

    /// Short stable fingerprint of an input, for logs
    pub fn fingerprint(agent_id: &str, body: &str) -> String {
        hex::encode(&digest(agent_id, body)[..6])
    }
}

fn digest(agent_id: &str, body: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(body.as_bytes());
    hasher.finalize().into()
}

fn seed(agent_id: &str, body: &str) -> u64 {
    let digest = digest(agent_id, body);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
