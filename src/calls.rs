use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;

/// What the smart account should do once the operation validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallIntent {
    NativeTransfer {
        to: Address,
        value: U256,
    },
    TokenTransfer {
        token: Address,
        to: Address,
        amount: U256,
    },
    Raw {
        target: Address,
        value: U256,
        data: Bytes,
    },
}

impl CallIntent {
    /// SimpleAccount `execute(address dest, uint256 value, bytes func)` call data.
    pub fn encode(&self) -> Bytes {
        match self {
            CallIntent::NativeTransfer { to, value } => execute(*to, *value, &Bytes::new()),
            CallIntent::TokenTransfer { token, to, amount } => {
                execute(*token, U256::zero(), &erc20_transfer(*to, *amount))
            }
            CallIntent::Raw {
                target,
                value,
                data,
            } => execute(*target, *value, data),
        }
    }
}

pub fn execute(dest: Address, value: U256, func: &Bytes) -> Bytes {
    with_selector(
        "execute(address,uint256,bytes)",
        &[
            Token::Address(dest),
            Token::Uint(value),
            Token::Bytes(func.to_vec()),
        ],
    )
}

pub fn erc20_transfer(to: Address, amount: U256) -> Bytes {
    with_selector(
        "transfer(address,uint256)",
        &[Token::Address(to), Token::Uint(amount)],
    )
}

fn with_selector(signature: &str, args: &[Token]) -> Bytes {
    let mut v = id(signature).to_vec();
    v.extend(encode(args));
    Bytes::from(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_transfer_wraps_erc20_call() {
        let token = Address::repeat_byte(0x11);
        let to = Address::repeat_byte(0x22);
        let data = CallIntent::TokenTransfer {
            token,
            to,
            amount: U256::from(1000u64),
        }
        .encode();

        assert_eq!(&data[..4], &[0xb6, 0x1d, 0x27, 0xf6]);
        // dest
        assert_eq!(&data[16..36], token.as_bytes());
        // value = 0
        assert!(data[36..68].iter().all(|b| *b == 0));
        // bytes offset, length (4 + 32 + 32 = 68), then the transfer call
        assert_eq!(data[99], 0x60);
        assert_eq!(data[131], 68);
        assert_eq!(&data[132..136], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(&data[148..168], to.as_bytes());
        assert_eq!(&data[198..200], &[0x03, 0xe8]);
    }

    #[test]
    fn native_transfer_has_empty_func() {
        let data = CallIntent::NativeTransfer {
            to: Address::repeat_byte(0x33),
            value: U256::exp10(18),
        }
        .encode();
        // selector + dest + value + offset + zero length
        assert_eq!(data.len(), 4 + 32 * 4);
        assert!(data[100..].iter().all(|b| *b == 0));
    }
}
