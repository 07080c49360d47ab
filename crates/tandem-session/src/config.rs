use anyhow::Context;

use tandem_types::UserId;

/// The application serves exactly two fixed accounts; the mapping from
/// a local identity to its counterpart is total over those two ids and
/// undefined for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairConfig {
    user_one: UserId,
    user_two: UserId,
}

impl PairConfig {
    pub fn new(user_one: UserId, user_two: UserId) -> Self {
        Self { user_one, user_two }
    }

    /// Read the pair from `TANDEM_USER_ONE` / `TANDEM_USER_TWO`.
    pub fn from_env() -> anyhow::Result<Self> {
        let user_one = std::env::var("TANDEM_USER_ONE").context("TANDEM_USER_ONE is not set")?;
        let user_two = std::env::var("TANDEM_USER_TWO").context("TANDEM_USER_TWO is not set")?;
        Ok(Self::new(UserId::new(user_one), UserId::new(user_two)))
    }

    pub fn user_one(&self) -> &UserId {
        &self.user_one
    }

    pub fn user_two(&self) -> &UserId {
        &self.user_two
    }

    /// The other half of the pair, or `None` for any id outside it.
    pub fn counterpart(&self, me: &UserId) -> Option<UserId> {
        if me == &self.user_one {
            Some(self.user_two.clone())
        } else if me == &self.user_two {
            Some(self.user_one.clone())
        } else {
            None
        }
    }
}
