//! PLONKish circuit for swap eligibility.
//!
//! The circuit proves, for private `(balance, swapAmount, secretKey, nonce,
//! eligibilityFlag)` and public `(minBalance, maxSwapAmount, merkleRoot)`:
//!
//! 1. `balance` and `swapAmount` fit in 64 bits,
//! 2. `b1 = [balance >= minBalance + swapAmount]`,
//! 3. `b2 = [swapAmount <= maxSwapAmount]`,
//! 4. `b3 = [eligibilityFlag == 1]`,
//! 5. `isEligible = b1 * b2 * b3`, and in [`EligibilityMode::Strict`]
//!    `b1 + b2 + b3 == 3`,
//! 6. `nullifier = Poseidon(secretKey, nonce) * isEligible`,
//! 7. `commitment = Poseidon(swapAmount, balance, Poseidon(secretKey, nonce)) * isEligible`.
//!
//! Instance rows are laid out as described in [`crate::types`]:
//! `[nullifier, commitment, isEligible, minBalance, maxSwapAmount, merkleRoot]`.
//!
//! Comparisons use the classic shifted-difference trick: for operands below
//! `2^n`, the top bit of the `(n + 1)`-bit decomposition of `a - b + 2^n` is
//! `[a >= b]`.
//!
//! `merkleRoot` is only pinned to its instance row. No gate reads it, so a
//! proof says nothing about membership of `secretKey` in the eligible set.
//! Membership is checked natively by the prover before proving (see
//! [`crate::merkle::EligibleSet`]), and verifiers must compare the root
//! against their own.

use crate::error::{SwapError, SwapResult};
use crate::secrets::{commitment_field, nullifier_field};
use crate::types::{
    EligibilityMode, EligibilityResult, PrivateWitness, PublicInputs, PublicSignals,
    SIGNAL_COMMITMENT, SIGNAL_IS_ELIGIBLE, SIGNAL_MAX_SWAP_AMOUNT, SIGNAL_MERKLE_ROOT,
    SIGNAL_MIN_BALANCE, SIGNAL_NULLIFIER,
};
use halo2_gadgets::poseidon::{
    primitives::{ConstantLength, P128Pow5T3},
    Hash as PoseidonHash, Pow5Chip, Pow5Config,
};
use halo2_proofs::{
    circuit::{AssignedCell, Layouter, SimpleFloorPlanner, Value},
    plonk::{Advice, Circuit, Column, ConstraintSystem, Error, Expression, Fixed, Instance, Selector},
    poly::Rotation,
};
use pasta_curves::group::ff::{Field, PrimeField};
use pasta_curves::pallas;

type Fp = pallas::Base;
type Cell = AssignedCell<Fp, Fp>;

/// Bit width of private amounts.
pub const AMOUNT_BITS: usize = 64;

/// Coefficients of the standard gate `q_l*x + q_r*y + q_m*x*y + q_c = z`.
#[derive(Debug, Clone, Copy)]
struct Coeffs {
    l: Fp,
    r: Fp,
    m: Fp,
    c: Fp,
}

impl Coeffs {
    fn add() -> Self {
        Self { l: Fp::ONE, r: Fp::ONE, m: Fp::ZERO, c: Fp::ZERO }
    }

    fn mul() -> Self {
        Self { l: Fp::ZERO, r: Fp::ZERO, m: Fp::ONE, c: Fp::ZERO }
    }

    /// `x - y + c`
    fn sub_plus(c: Fp) -> Self {
        Self { l: Fp::ONE, r: -Fp::ONE, m: Fp::ZERO, c }
    }

    /// `x + c`
    fn offset(c: Fp) -> Self {
        Self { l: Fp::ONE, r: Fp::ZERO, m: Fp::ZERO, c }
    }

    fn apply(&self, x: Fp, y: Fp) -> Fp {
        self.l * x + self.r * y + self.m * x * y + self.c
    }
}

fn pow2(n: usize) -> Fp {
    (0..n).fold(Fp::ONE, |acc, _| acc.double())
}

/// Bit `index` (LSB = 0) of the canonical integer value of `v`.
fn field_bit(v: &Fp, index: usize) -> Fp {
    let repr = v.to_repr();
    Fp::from(((repr.as_ref()[index / 8] >> (index % 8)) & 1) as u64)
}

#[derive(Debug, Clone)]
pub struct EligibilityConfig {
    advice: [Column<Advice>; 3],
    q_l: Column<Fixed>,
    q_r: Column<Fixed>,
    q_m: Column<Fixed>,
    q_c: Column<Fixed>,
    q_arith: Selector,
    q_decompose: Selector,
    q_is_zero: Selector,
    instance: Column<Instance>,
    poseidon: Pow5Config<Fp, 3, 2>,
}

impl EligibilityConfig {
    fn configure(meta: &mut ConstraintSystem<Fp>) -> Self {
        let advice = [meta.advice_column(), meta.advice_column(), meta.advice_column()];
        let partial_sbox = meta.advice_column();
        let rc_a = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let rc_b = [meta.fixed_column(), meta.fixed_column(), meta.fixed_column()];
        let q_l = meta.fixed_column();
        let q_r = meta.fixed_column();
        let q_m = meta.fixed_column();
        let q_c = meta.fixed_column();
        let instance = meta.instance_column();

        meta.enable_constant(rc_b[0]);
        meta.enable_equality(instance);
        for column in advice {
            meta.enable_equality(column);
        }

        let q_arith = meta.selector();
        let q_decompose = meta.selector();
        let q_is_zero = meta.selector();

        meta.create_gate("standard arithmetic", |meta| {
            let s = meta.query_selector(q_arith);
            let x = meta.query_advice(advice[0], Rotation::cur());
            let y = meta.query_advice(advice[1], Rotation::cur());
            let z = meta.query_advice(advice[2], Rotation::cur());
            let ql = meta.query_fixed(q_l);
            let qr = meta.query_fixed(q_r);
            let qm = meta.query_fixed(q_m);
            let qc = meta.query_fixed(q_c);

            vec![s * (ql * x.clone() + qr * y.clone() + qm * x * y + qc - z)]
        });

        // Running sum, most significant bit first: acc' = 2 * acc + bit.
        meta.create_gate("bit decomposition", |meta| {
            let s = meta.query_selector(q_decompose);
            let acc = meta.query_advice(advice[0], Rotation::cur());
            let bit = meta.query_advice(advice[1], Rotation::cur());
            let acc_next = meta.query_advice(advice[0], Rotation::next());
            let one = Expression::Constant(Fp::ONE);
            let two = Expression::Constant(Fp::from(2));

            vec![
                s.clone() * bit.clone() * (one - bit.clone()),
                s * (acc_next - (acc * two + bit)),
            ]
        });

        // out = 1 - x * inv, x * out = 0
        meta.create_gate("is zero", |meta| {
            let s = meta.query_selector(q_is_zero);
            let x = meta.query_advice(advice[0], Rotation::cur());
            let inv = meta.query_advice(advice[1], Rotation::cur());
            let out = meta.query_advice(advice[2], Rotation::cur());
            let one = Expression::Constant(Fp::ONE);

            vec![
                s.clone() * x.clone() * out.clone(),
                s * (out - (one - x * inv)),
            ]
        });

        let poseidon = Pow5Chip::configure::<P128Pow5T3>(meta, advice, partial_sbox, rc_a, rc_b);

        Self {
            advice,
            q_l,
            q_r,
            q_m,
            q_c,
            q_arith,
            q_decompose,
            q_is_zero,
            instance,
            poseidon,
        }
    }

    fn assign_value(
        &self,
        mut layouter: impl Layouter<Fp>,
        name: &'static str,
        value: Value<Fp>,
    ) -> Result<Cell, Error> {
        layouter.assign_region(
            || name,
            |mut region| region.assign_advice(|| name, self.advice[0], 0, || value),
        )
    }

    /// One standard-gate row. When `expect` is set, the output is also pinned
    /// to that constant.
    fn arith(
        &self,
        mut layouter: impl Layouter<Fp>,
        name: &'static str,
        x: &Cell,
        y: &Cell,
        coeffs: Coeffs,
        expect: Option<Fp>,
    ) -> Result<Cell, Error> {
        layouter.assign_region(
            || name,
            |mut region| {
                self.q_arith.enable(&mut region, 0)?;
                let x = x.copy_advice(|| "x", &mut region, self.advice[0], 0)?;
                let y = y.copy_advice(|| "y", &mut region, self.advice[1], 0)?;
                region.assign_fixed(|| "q_l", self.q_l, 0, || Value::known(coeffs.l))?;
                region.assign_fixed(|| "q_r", self.q_r, 0, || Value::known(coeffs.r))?;
                region.assign_fixed(|| "q_m", self.q_m, 0, || Value::known(coeffs.m))?;
                region.assign_fixed(|| "q_c", self.q_c, 0, || Value::known(coeffs.c))?;

                let z_value = x
                    .value()
                    .zip(y.value())
                    .map(|(x, y)| coeffs.apply(*x, *y));
                let z = region.assign_advice(|| "z", self.advice[2], 0, || z_value)?;
                if let Some(constant) = expect {
                    region.constrain_constant(z.cell(), constant)?;
                }
                Ok(z)
            },
        )
    }

    /// Decomposes `target` into `n` bits, most significant first.
    ///
    /// Unsatisfiable when `target >= 2^n`.
    fn decompose(
        &self,
        mut layouter: impl Layouter<Fp>,
        name: &'static str,
        target: &Cell,
        n: usize,
    ) -> Result<Vec<Cell>, Error> {
        layouter.assign_region(
            || name,
            |mut region| {
                let mut acc =
                    region.assign_advice_from_constant(|| "acc 0", self.advice[0], 0, Fp::ZERO)?;
                let mut bits = Vec::with_capacity(n);

                for row in 0..n {
                    self.q_decompose.enable(&mut region, row)?;
                    let bit_value = target.value().map(|v| field_bit(v, n - 1 - row));
                    let bit = region.assign_advice(|| "bit", self.advice[1], row, || bit_value)?;

                    let next_value = acc
                        .value()
                        .zip(bit.value())
                        .map(|(acc, bit)| acc.double() + bit);
                    acc = region.assign_advice(|| "acc", self.advice[0], row + 1, || next_value)?;
                    bits.push(bit);
                }

                region.constrain_equal(acc.cell(), target.cell())?;
                Ok(bits)
            },
        )
    }

    /// Returns a cell holding `[x == 0]`.
    fn is_zero(
        &self,
        mut layouter: impl Layouter<Fp>,
        name: &'static str,
        x: &Cell,
    ) -> Result<Cell, Error> {
        layouter.assign_region(
            || name,
            |mut region| {
                self.q_is_zero.enable(&mut region, 0)?;
                let x = x.copy_advice(|| "x", &mut region, self.advice[0], 0)?;
                let inv = x.value().map(|v| v.invert().unwrap_or(Fp::ZERO));
                region.assign_advice(|| "inv", self.advice[1], 0, || inv)?;
                let out = x
                    .value()
                    .map(|v| if v.is_zero_vartime() { Fp::ONE } else { Fp::ZERO });
                region.assign_advice(|| "out", self.advice[2], 0, || out)
            },
        )
    }

    /// Returns a cell holding `[a >= b]` for `a, b < 2^bits`.
    fn greater_or_equal(
        &self,
        mut layouter: impl Layouter<Fp>,
        name: &'static str,
        a: &Cell,
        b: &Cell,
        bits: usize,
    ) -> Result<Cell, Error> {
        let shifted = self.arith(
            layouter.namespace(|| format!("{name}: shifted difference")),
            "shifted difference",
            a,
            b,
            Coeffs::sub_plus(pow2(bits)),
            None,
        )?;
        let decomposition = self.decompose(
            layouter.namespace(|| format!("{name}: decomposition")),
            "comparison bits",
            &shifted,
            bits + 1,
        )?;
        decomposition
            .into_iter()
            .next()
            .ok_or(Error::Synthesis)
    }

    fn range_check(
        &self,
        layouter: impl Layouter<Fp>,
        name: &'static str,
        value: &Cell,
        bits: usize,
    ) -> Result<(), Error> {
        self.decompose(layouter, name, value, bits).map(|_| ())
    }

    fn poseidon<const L: usize>(
        &self,
        mut layouter: impl Layouter<Fp>,
        message: [Cell; L],
    ) -> Result<Cell, Error> {
        let chip = Pow5Chip::construct(self.poseidon.clone());
        let hasher = PoseidonHash::<_, _, P128Pow5T3, ConstantLength<L>, 3, 2>::init(
            chip,
            layouter.namespace(|| "poseidon init"),
        )?;
        hasher.hash(layouter.namespace(|| "poseidon hash"), message)
    }
}

/// The eligibility circuit. Holds the witness only while proving.
#[derive(Debug, Clone, Default)]
pub struct EligibilityCircuit {
    witness: Option<PrivateWitness>,
    public: Option<PublicInputs>,
    mode: EligibilityMode,
}

impl EligibilityCircuit {
    pub fn new(witness: PrivateWitness, public: PublicInputs, mode: EligibilityMode) -> Self {
        Self {
            witness: Some(witness),
            public: Some(public),
            mode,
        }
    }

    /// A witness-free instance for key generation.
    pub fn blank(mode: EligibilityMode) -> Self {
        Self {
            witness: None,
            public: None,
            mode,
        }
    }

    pub fn mode(&self) -> EligibilityMode {
        self.mode
    }

    fn private_value(&self, f: impl Fn(&PrivateWitness) -> Fp) -> Value<Fp> {
        match &self.witness {
            Some(w) => Value::known(f(w)),
            None => Value::unknown(),
        }
    }

    fn public_value(&self, f: impl Fn(&PublicInputs) -> SwapResult<Fp>) -> Result<Value<Fp>, Error> {
        match &self.public {
            Some(p) => f(p).map(Value::known).map_err(|_| Error::Synthesis),
            None => Ok(Value::unknown()),
        }
    }
}

impl Circuit<Fp> for EligibilityCircuit {
    type Config = EligibilityConfig;
    type FloorPlanner = SimpleFloorPlanner;

    fn without_witnesses(&self) -> Self {
        Self::blank(self.mode)
    }

    fn configure(meta: &mut ConstraintSystem<Fp>) -> Self::Config {
        EligibilityConfig::configure(meta)
    }

    fn synthesize(&self, config: Self::Config, mut layouter: impl Layouter<Fp>) -> Result<(), Error> {
        let balance = config.assign_value(
            layouter.namespace(|| "balance"),
            "balance",
            self.private_value(|w| Fp::from(w.balance)),
        )?;
        let swap_amount = config.assign_value(
            layouter.namespace(|| "swap amount"),
            "swap amount",
            self.private_value(|w| Fp::from(w.swap_amount)),
        )?;
        let secret_key = config.assign_value(
            layouter.namespace(|| "secret key"),
            "secret key",
            self.private_value(PrivateWitness::secret_key_field),
        )?;
        let nonce = config.assign_value(
            layouter.namespace(|| "nonce"),
            "nonce",
            self.private_value(PrivateWitness::nonce_field),
        )?;
        let flag = config.assign_value(
            layouter.namespace(|| "eligibility flag"),
            "eligibility flag",
            self.private_value(|w| Fp::from(w.eligibility_flag)),
        )?;

        let min_balance = config.assign_value(
            layouter.namespace(|| "min balance"),
            "min balance",
            self.public_value(|p| Ok(Fp::from(p.min_balance)))?,
        )?;
        let max_swap_amount = config.assign_value(
            layouter.namespace(|| "max swap amount"),
            "max swap amount",
            self.public_value(|p| Ok(Fp::from(p.max_swap_amount)))?,
        )?;
        let merkle_root = config.assign_value(
            layouter.namespace(|| "merkle root"),
            "merkle root",
            self.public_value(PublicInputs::merkle_root_field)?,
        )?;

        config.range_check(layouter.namespace(|| "balance range"), "balance bits", &balance, AMOUNT_BITS)?;
        config.range_check(
            layouter.namespace(|| "swap amount range"),
            "swap amount bits",
            &swap_amount,
            AMOUNT_BITS,
        )?;

        let needed = config.arith(
            layouter.namespace(|| "min balance + swap amount"),
            "needed balance",
            &min_balance,
            &swap_amount,
            Coeffs::add(),
            None,
        )?;
        let balance_ok = config.greater_or_equal(
            layouter.namespace(|| "balance sufficiency"),
            "balance sufficiency",
            &balance,
            &needed,
            AMOUNT_BITS + 1,
        )?;
        let amount_ok = config.greater_or_equal(
            layouter.namespace(|| "amount bound"),
            "amount bound",
            &max_swap_amount,
            &swap_amount,
            AMOUNT_BITS,
        )?;
        let flag_minus_one = config.arith(
            layouter.namespace(|| "flag - 1"),
            "flag minus one",
            &flag,
            &flag,
            Coeffs::offset(-Fp::ONE),
            None,
        )?;
        let flag_ok = config.is_zero(layouter.namespace(|| "flag equality"), "flag equality", &flag_minus_one)?;

        let partial_sum = config.arith(
            layouter.namespace(|| "b1 + b2"),
            "partial sum",
            &balance_ok,
            &amount_ok,
            Coeffs::add(),
            None,
        )?;
        let conjunction = match self.mode {
            EligibilityMode::Strict => Some(Fp::from(3)),
            EligibilityMode::Soft => None,
        };
        config.arith(
            layouter.namespace(|| "b1 + b2 + b3"),
            "check sum",
            &partial_sum,
            &flag_ok,
            Coeffs::add(),
            conjunction,
        )?;

        let partial_product = config.arith(
            layouter.namespace(|| "b1 * b2"),
            "partial product",
            &balance_ok,
            &amount_ok,
            Coeffs::mul(),
            None,
        )?;
        let is_eligible = config.arith(
            layouter.namespace(|| "b1 * b2 * b3"),
            "is eligible",
            &partial_product,
            &flag_ok,
            Coeffs::mul(),
            None,
        )?;

        let raw_nullifier = config.poseidon(
            layouter.namespace(|| "H(secret key, nonce)"),
            [secret_key, nonce],
        )?;
        let raw_commitment = config.poseidon(
            layouter.namespace(|| "H(swap amount, balance, nullifier)"),
            [swap_amount, balance, raw_nullifier.clone()],
        )?;

        let nullifier = config.arith(
            layouter.namespace(|| "gated nullifier"),
            "nullifier",
            &raw_nullifier,
            &is_eligible,
            Coeffs::mul(),
            None,
        )?;
        let commitment = config.arith(
            layouter.namespace(|| "gated commitment"),
            "commitment",
            &raw_commitment,
            &is_eligible,
            Coeffs::mul(),
            None,
        )?;

        layouter.constrain_instance(nullifier.cell(), config.instance, SIGNAL_NULLIFIER)?;
        layouter.constrain_instance(commitment.cell(), config.instance, SIGNAL_COMMITMENT)?;
        layouter.constrain_instance(is_eligible.cell(), config.instance, SIGNAL_IS_ELIGIBLE)?;
        layouter.constrain_instance(min_balance.cell(), config.instance, SIGNAL_MIN_BALANCE)?;
        layouter.constrain_instance(max_swap_amount.cell(), config.instance, SIGNAL_MAX_SWAP_AMOUNT)?;
        layouter.constrain_instance(merkle_root.cell(), config.instance, SIGNAL_MERKLE_ROOT)?;

        Ok(())
    }
}

/// Computes the circuit's output signals natively.
///
/// Mirrors the constraint system gate for gate: predicate-false witnesses
/// collapse nullifier and commitment to zero.
pub fn evaluate(witness: &PrivateWitness, public: &PublicInputs) -> SwapResult<EligibilityResult> {
    if witness.eligibility_flag > 1 {
        return Err(SwapError::InputValidation(
            "eligibility flag must be 0 or 1".into(),
        ));
    }

    let needed = u128::from(public.min_balance) + u128::from(witness.swap_amount);
    let balance_ok = u128::from(witness.balance) >= needed;
    let amount_ok = witness.swap_amount <= public.max_swap_amount;
    let flag_ok = witness.eligibility_flag == 1;
    let is_eligible = balance_ok && amount_ok && flag_ok;

    let raw_nullifier = nullifier_field(witness.secret_key_field(), witness.nonce_field());
    let raw_commitment = commitment_field(witness.swap_amount, witness.balance, raw_nullifier);
    let gate = if is_eligible { Fp::ONE } else { Fp::ZERO };

    let public_signals =
        PublicSignals::new(raw_nullifier * gate, raw_commitment * gate, is_eligible, public)?;

    Ok(EligibilityResult {
        is_eligible,
        nullifier: public_signals.nullifier(),
        commitment: public_signals.commitment(),
        public_signals,
    })
}
