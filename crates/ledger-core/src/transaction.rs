//! Value transfers. A transaction's id is the SHA-256 of its encoded inputs and
//! outputs, sealed once at construction.

use crate::{
    codec,
    constants::{COINBASE_OUTPUT_INDEX, COINBASE_REWARD},
    sha256, short_hex, Hash, LedgerError, Result,
};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Reference to an output of an earlier transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Empty for coinbase inputs.
    pub prev_tx_id: Vec<u8>,
    pub output_index: i64,
    pub unlock_signature: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: u64,
    pub lock_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self> {
        let id = compute_id(&inputs, &outputs)?;
        Ok(Self {
            id,
            inputs,
            outputs,
        })
    }

    /// The reward transaction. An empty `memo` becomes "Coins to {to}".
    pub fn new_coinbase(to: &str, memo: &str) -> Result<Self> {
        let memo = if memo.is_empty() {
            format!("Coins to {to}")
        } else {
            memo.to_string()
        };
        let input = TxInput {
            prev_tx_id: Vec::new(),
            output_index: COINBASE_OUTPUT_INDEX,
            unlock_signature: memo,
        };
        let output = TxOutput {
            value: COINBASE_REWARD,
            lock_key: to.to_string(),
        };
        Self::new(vec![input], vec![output])
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1
            && self.inputs[0].prev_tx_id.is_empty()
            && self.inputs[0].output_index == COINBASE_OUTPUT_INDEX
    }

    /// True if `id` still matches the inputs and outputs.
    pub fn verify_id(&self) -> Result<bool> {
        Ok(compute_id(&self.inputs, &self.outputs)? == self.id)
    }

    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// One-line description used by the CLI print-out.
    pub fn summary(&self) -> String {
        let kind = if self.is_coinbase() { "coinbase" } else { "transfer" };
        let memo = self
            .inputs
            .first()
            .map(|i| i.unlock_signature.as_str())
            .unwrap_or("");
        let recipients: Vec<&str> = self.outputs.iter().map(|o| o.lock_key.as_str()).collect();
        format!(
            "{} {} [{}] {} -> {}",
            kind,
            short_hex(&self.id),
            memo,
            self.total_output(),
            recipients.join(",")
        )
    }
}

fn compute_id(inputs: &[TxInput], outputs: &[TxOutput]) -> Result<Hash> {
    let encoded = codec()
        .serialize(&(inputs, outputs))
        .map_err(|e| LedgerError::Encode(e.to_string()))?;
    Ok(sha256(&encoded))
}

/// Authorization check for spending. Only plain string matching exists today.
pub trait UnlockVerifier {
    fn input_can_unlock(&self, input: &TxInput, data: &str) -> bool;
    fn output_can_be_unlocked(&self, output: &TxOutput, data: &str) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StringEquality;

impl UnlockVerifier for StringEquality {
    fn input_can_unlock(&self, input: &TxInput, data: &str) -> bool {
        input.unlock_signature == data
    }

    fn output_can_be_unlocked(&self, output: &TxOutput, data: &str) -> bool {
        output.lock_key == data
    }
}

impl TxInput {
    pub fn can_unlock(&self, data: &str) -> bool {
        StringEquality.input_can_unlock(self, data)
    }
}

impl TxOutput {
    pub fn can_be_unlocked(&self, data: &str) -> bool {
        StringEquality.output_can_be_unlocked(self, data)
    }
}
