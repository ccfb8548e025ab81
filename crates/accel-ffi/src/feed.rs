//! Infeed and outfeed entry points

use accel_core::{Error, Result};

use crate::decode::{self, arity};
use crate::handles::{get_client, get_shape};
use crate::term::Term;
use crate::{reply, reply_unit};

/// `transfer_to_infeed(Client, DeviceId, [Binary], Shape)`
pub fn transfer_to_infeed(args: &[Term]) -> Term {
    reply_unit(try_transfer_to_infeed(args))
}

fn try_transfer_to_infeed(args: &[Term]) -> Result<()> {
    let [client, device, data, shape] = arity::<4>(args)?;
    let client = get_client(client)?;
    let device = decode::device(device)?;
    let expects_binaries = || Error::invalid_argument("infeed operation expects a list of binaries");
    let payloads = data
        .as_list()
        .ok_or_else(expects_binaries)?
        .iter()
        .map(|item| item.as_binary().map(|binary| binary.pin()).ok_or_else(expects_binaries))
        .collect::<Result<Vec<_>>>()?;
    let shape = get_shape(shape)?;

    client.transfer_to_infeed(payloads, &shape, device)
}

/// `transfer_from_outfeed(Client, DeviceId, Shape)`
///
/// Blocks until the device emits a value, then answers its bytes.
pub fn transfer_from_outfeed(args: &[Term]) -> Term {
    reply(arity::<3>(args).and_then(|[client, device, shape]| {
        let client = get_client(client)?;
        let bytes = client.transfer_from_outfeed(decode::device(device)?, &get_shape(shape)?)?;
        Ok(Term::binary(bytes))
    }))
}
