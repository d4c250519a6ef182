//! Binary codec for vault program accounts
//!
//! Each account type declares one [`AccountSchema`]: its Anchor name and the
//! ordered list of fields with their widths. The schema is the single source
//! of truth for the minimum data length, the 8-byte type tag, and the order in
//! which [`FieldReader`] / [`FieldWriter`] accept fields. All integers are
//! little-endian; wide amounts are `u64`/`i64`, never floats.

use solana_sdk::hash::hash;
use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

pub const DISCRIMINATOR_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Pubkey,
    Bool,
    U8,
    U32,
    U64,
    I64,
}

impl FieldKind {
    pub const fn width(self) -> usize {
        match self {
            FieldKind::Pubkey => 32,
            FieldKind::Bool | FieldKind::U8 => 1,
            FieldKind::U32 => 4,
            FieldKind::U64 | FieldKind::I64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSchema {
    /// Anchor account name, hashed into the type tag
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl AccountSchema {
    /// Serialized size including the type tag
    pub const fn data_len(&self) -> usize {
        let mut len = DISCRIMINATOR_LEN;
        let mut i = 0;
        while i < self.fields.len() {
            len += self.fields[i].kind.width();
            i += 1;
        }
        len
    }

    pub fn discriminator(&self) -> [u8; 8] {
        account_discriminator(self.name)
    }
}

/// First 8 bytes of SHA-256("global:<name>")
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    sighash("global", name)
}

/// First 8 bytes of SHA-256("account:<Name>")
pub fn account_discriminator(name: &str) -> [u8; 8] {
    sighash("account", name)
}

fn sighash(namespace: &str, name: &str) -> [u8; 8] {
    let digest = hash(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest.to_bytes()[..8]);
    out
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("{account} account data too short: {actual} bytes (expected at least {expected})")]
    MalformedAccount {
        account: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("data is not a {account} account (type tag {found:?})")]
    WrongAccountType { account: &'static str, found: [u8; 8] },

    #[error("{account} field `{field}` accessed out of schema order (schema expects `{expected}`)")]
    SchemaMismatch {
        account: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    #[error("{account} field `{field}` holds invalid bool byte {value}")]
    InvalidBool {
        account: &'static str,
        field: &'static str,
        value: u8,
    },
}

const END_OF_SCHEMA: &str = "<end>";

/// Sequential reader over an account buffer, validated against a schema
pub struct FieldReader<'a> {
    schema: &'a AccountSchema,
    data: &'a [u8],
    offset: usize,
    index: usize,
}

impl<'a> FieldReader<'a> {
    /// Checks the length and type tag up front; trailing bytes past the
    /// schema are ignored (accounts may be over-allocated).
    pub fn new(schema: &'a AccountSchema, data: &'a [u8]) -> Result<Self, CodecError> {
        let expected = schema.data_len();
        if data.len() < expected {
            return Err(CodecError::MalformedAccount {
                account: schema.name,
                expected,
                actual: data.len(),
            });
        }

        let mut found = [0u8; DISCRIMINATOR_LEN];
        found.copy_from_slice(&data[..DISCRIMINATOR_LEN]);
        if found != schema.discriminator() {
            return Err(CodecError::WrongAccountType {
                account: schema.name,
                found,
            });
        }

        Ok(Self {
            schema,
            data,
            offset: DISCRIMINATOR_LEN,
            index: 0,
        })
    }

    fn take(&mut self, name: &'static str, kind: FieldKind) -> Result<&'a [u8], CodecError> {
        let spec = self.schema.fields.get(self.index);
        match spec {
            Some(spec) if spec.name == name && spec.kind == kind => {}
            _ => {
                return Err(CodecError::SchemaMismatch {
                    account: self.schema.name,
                    field: name,
                    expected: spec.map(|s| s.name).unwrap_or(END_OF_SCHEMA),
                })
            }
        }

        let end = self.offset + kind.width();
        let bytes = self.data.get(self.offset..end).ok_or(CodecError::MalformedAccount {
            account: self.schema.name,
            expected: end,
            actual: self.data.len(),
        })?;
        self.offset = end;
        self.index += 1;
        Ok(bytes)
    }

    fn array<const N: usize>(
        &mut self,
        name: &'static str,
        kind: FieldKind,
    ) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(name, kind)?);
        Ok(out)
    }

    pub fn pubkey(&mut self, name: &'static str) -> Result<Pubkey, CodecError> {
        Ok(Pubkey::new_from_array(self.array::<32>(name, FieldKind::Pubkey)?))
    }

    pub fn u8(&mut self, name: &'static str) -> Result<u8, CodecError> {
        Ok(self.take(name, FieldKind::U8)?[0])
    }

    pub fn bool(&mut self, name: &'static str) -> Result<bool, CodecError> {
        match self.take(name, FieldKind::Bool)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(CodecError::InvalidBool {
                account: self.schema.name,
                field: name,
                value,
            }),
        }
    }

    pub fn u32(&mut self, name: &'static str) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array::<4>(name, FieldKind::U32)?))
    }

    pub fn u64(&mut self, name: &'static str) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array::<8>(name, FieldKind::U64)?))
    }

    pub fn i64(&mut self, name: &'static str) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.array::<8>(name, FieldKind::I64)?))
    }

    /// Every schema field must have been consumed
    pub fn finish(self) -> Result<(), CodecError> {
        match self.schema.fields.get(self.index) {
            None => Ok(()),
            Some(missing) => Err(CodecError::SchemaMismatch {
                account: self.schema.name,
                field: END_OF_SCHEMA,
                expected: missing.name,
            }),
        }
    }
}

/// Sequential writer producing a buffer laid out by a schema
pub struct FieldWriter<'s> {
    schema: &'s AccountSchema,
    buf: Vec<u8>,
    index: usize,
}

impl<'s> FieldWriter<'s> {
    pub fn new(schema: &'s AccountSchema) -> Self {
        let mut buf = Vec::with_capacity(schema.data_len());
        buf.extend_from_slice(&schema.discriminator());
        Self { schema, buf, index: 0 }
    }

    fn put(
        &mut self,
        name: &'static str,
        kind: FieldKind,
        bytes: &[u8],
    ) -> Result<&mut Self, CodecError> {
        let spec = self.schema.fields.get(self.index);
        match spec {
            Some(spec) if spec.name == name && spec.kind == kind => {
                self.buf.extend_from_slice(bytes);
                self.index += 1;
                Ok(self)
            }
            _ => Err(CodecError::SchemaMismatch {
                account: self.schema.name,
                field: name,
                expected: spec.map(|s| s.name).unwrap_or(END_OF_SCHEMA),
            }),
        }
    }

    pub fn pubkey(&mut self, name: &'static str, value: &Pubkey) -> Result<&mut Self, CodecError> {
        self.put(name, FieldKind::Pubkey, value.as_ref())
    }

    pub fn u8(&mut self, name: &'static str, value: u8) -> Result<&mut Self, CodecError> {
        self.put(name, FieldKind::U8, &[value])
    }

    pub fn bool(&mut self, name: &'static str, value: bool) -> Result<&mut Self, CodecError> {
        self.put(name, FieldKind::Bool, &[value as u8])
    }

    pub fn u32(&mut self, name: &'static str, value: u32) -> Result<&mut Self, CodecError> {
        self.put(name, FieldKind::U32, &value.to_le_bytes())
    }

    pub fn u64(&mut self, name: &'static str, value: u64) -> Result<&mut Self, CodecError> {
        self.put(name, FieldKind::U64, &value.to_le_bytes())
    }

    pub fn i64(&mut self, name: &'static str, value: i64) -> Result<&mut Self, CodecError> {
        self.put(name, FieldKind::I64, &value.to_le_bytes())
    }

    pub fn finish(self) -> Result<Vec<u8>, CodecError> {
        match self.schema.fields.get(self.index) {
            None => Ok(self.buf),
            Some(missing) => Err(CodecError::SchemaMismatch {
                account: self.schema.name,
                field: END_OF_SCHEMA,
                expected: missing.name,
            }),
        }
    }
}

/// An account type with a fixed binary layout
pub trait AccountLayout: Sized {
    const SCHEMA: AccountSchema;

    fn read_fields(reader: &mut FieldReader<'_>) -> Result<Self, CodecError>;

    fn write_fields(&self, writer: &mut FieldWriter<'_>) -> Result<(), CodecError>;

    fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let schema = Self::SCHEMA;
        let mut reader = FieldReader::new(&schema, data)?;
        let value = Self::read_fields(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let schema = Self::SCHEMA;
        let mut writer = FieldWriter::new(&schema);
        self.write_fields(&mut writer)?;
        writer.finish()
    }
}

/// Casino singleton
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Casino {
    pub authority: Pubkey,
    pub processor: Pubkey,
    pub treasury: Pubkey,
    pub bump: u8,
    pub vault_authority_bump: u8,
    pub paused: bool,
    pub total_bets: u64,
    pub total_volume: u64,
    pub created_at: i64,
}

impl AccountLayout for Casino {
    const SCHEMA: AccountSchema = AccountSchema {
        name: "Casino",
        fields: &[
            field("authority", FieldKind::Pubkey),
            field("processor", FieldKind::Pubkey),
            field("treasury", FieldKind::Pubkey),
            field("bump", FieldKind::U8),
            field("vault_authority_bump", FieldKind::U8),
            field("paused", FieldKind::Bool),
            field("total_bets", FieldKind::U64),
            field("total_volume", FieldKind::U64),
            field("created_at", FieldKind::I64),
        ],
    };

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            authority: r.pubkey("authority")?,
            processor: r.pubkey("processor")?,
            treasury: r.pubkey("treasury")?,
            bump: r.u8("bump")?,
            vault_authority_bump: r.u8("vault_authority_bump")?,
            paused: r.bool("paused")?,
            total_bets: r.u64("total_bets")?,
            total_volume: r.u64("total_volume")?,
            created_at: r.i64("created_at")?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.pubkey("authority", &self.authority)?
            .pubkey("processor", &self.processor)?
            .pubkey("treasury", &self.treasury)?
            .u8("bump", self.bump)?
            .u8("vault_authority_bump", self.vault_authority_bump)?
            .bool("paused", self.paused)?
            .u64("total_bets", self.total_bets)?
            .u64("total_volume", self.total_volume)?
            .i64("created_at", self.created_at)?;
        Ok(())
    }
}

/// Per-user vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    pub owner: Pubkey,
    pub casino: Pubkey,
    pub bump: u8,
    pub sol_balance: u64,
    pub created_at: i64,
    pub last_activity: i64,
}

impl AccountLayout for Vault {
    const SCHEMA: AccountSchema = AccountSchema {
        name: "Vault",
        fields: &[
            field("owner", FieldKind::Pubkey),
            field("casino", FieldKind::Pubkey),
            field("bump", FieldKind::U8),
            field("sol_balance", FieldKind::U64),
            field("created_at", FieldKind::I64),
            field("last_activity", FieldKind::I64),
        ],
    };

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            owner: r.pubkey("owner")?,
            casino: r.pubkey("casino")?,
            bump: r.u8("bump")?,
            sol_balance: r.u64("sol_balance")?,
            created_at: r.i64("created_at")?,
            last_activity: r.i64("last_activity")?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.pubkey("owner", &self.owner)?
            .pubkey("casino", &self.casino)?
            .u8("bump", self.bump)?
            .u64("sol_balance", self.sol_balance)?
            .i64("created_at", self.created_at)?
            .i64("last_activity", self.last_activity)?;
        Ok(())
    }
}

/// Why an allowance cannot cover a spend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpendDenial {
    Revoked,
    Expired { expires_at: i64 },
    Insufficient { remaining: u64, requested: u64 },
}

/// Bounded spending authorization granted by a user to the casino
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowance {
    pub user: Pubkey,
    pub casino: Pubkey,
    pub token_mint: Pubkey,
    pub amount: u64,
    pub spent: u64,
    pub expires_at: i64,
    pub created_at: i64,
    pub nonce: u64,
    pub revoked: bool,
    pub bump: u8,
    pub last_spent_at: i64,
    pub spend_count: u32,
}

impl Allowance {
    pub fn remaining(&self) -> u64 {
        self.amount.saturating_sub(self.spent)
    }

    /// Reason the allowance cannot cover `amount` at unix time `now`, if any
    pub fn spend_denial(&self, amount: u64, now: i64) -> Option<SpendDenial> {
        if self.revoked {
            Some(SpendDenial::Revoked)
        } else if now >= self.expires_at {
            Some(SpendDenial::Expired {
                expires_at: self.expires_at,
            })
        } else if self.spent > self.amount || self.remaining() < amount {
            Some(SpendDenial::Insufficient {
                remaining: self.remaining(),
                requested: amount,
            })
        } else {
            None
        }
    }

    pub fn can_spend(&self, amount: u64, now: i64) -> bool {
        self.spend_denial(amount, now).is_none()
    }
}

impl AccountLayout for Allowance {
    const SCHEMA: AccountSchema = AccountSchema {
        name: "Allowance",
        fields: &[
            field("user", FieldKind::Pubkey),
            field("casino", FieldKind::Pubkey),
            field("token_mint", FieldKind::Pubkey),
            field("amount", FieldKind::U64),
            field("spent", FieldKind::U64),
            field("expires_at", FieldKind::I64),
            field("created_at", FieldKind::I64),
            field("nonce", FieldKind::U64),
            field("revoked", FieldKind::Bool),
            field("bump", FieldKind::U8),
            field("last_spent_at", FieldKind::I64),
            field("spend_count", FieldKind::U32),
        ],
    };

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            user: r.pubkey("user")?,
            casino: r.pubkey("casino")?,
            token_mint: r.pubkey("token_mint")?,
            amount: r.u64("amount")?,
            spent: r.u64("spent")?,
            expires_at: r.i64("expires_at")?,
            created_at: r.i64("created_at")?,
            nonce: r.u64("nonce")?,
            revoked: r.bool("revoked")?,
            bump: r.u8("bump")?,
            last_spent_at: r.i64("last_spent_at")?,
            spend_count: r.u32("spend_count")?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.pubkey("user", &self.user)?
            .pubkey("casino", &self.casino)?
            .pubkey("token_mint", &self.token_mint)?
            .u64("amount", self.amount)?
            .u64("spent", self.spent)?
            .i64("expires_at", self.expires_at)?
            .i64("created_at", self.created_at)?
            .u64("nonce", self.nonce)?
            .bool("revoked", self.revoked)?
            .u8("bump", self.bump)?
            .i64("last_spent_at", self.last_spent_at)?
            .u32("spend_count", self.spend_count)?;
        Ok(())
    }
}

/// Per user+casino counter selecting the next allowance PDA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowanceNonceRegistry {
    pub user: Pubkey,
    pub casino: Pubkey,
    pub next_nonce: u64,
    pub bump: u8,
}

impl AccountLayout for AllowanceNonceRegistry {
    const SCHEMA: AccountSchema = AccountSchema {
        name: "AllowanceNonceRegistry",
        fields: &[
            field("user", FieldKind::Pubkey),
            field("casino", FieldKind::Pubkey),
            field("next_nonce", FieldKind::U64),
            field("bump", FieldKind::U8),
        ],
    };

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            user: r.pubkey("user")?,
            casino: r.pubkey("casino")?,
            next_nonce: r.u64("next_nonce")?,
            bump: r.u8("bump")?,
        })
    }

    fn write_fields(&self, w: &mut FieldWriter<'_>) -> Result<(), CodecError> {
        w.pubkey("user", &self.user)?
            .pubkey("casino", &self.casino)?
            .u64("next_nonce", self.next_nonce)?
            .u8("bump", self.bump)?;
        Ok(())
    }
}
