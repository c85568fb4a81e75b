/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#[cfg(test)]
mod pipe;
#[cfg(test)]
mod readable;
#[cfg(test)]
mod support;
#[cfg(test)]
mod tee;
#[cfg(test)]
mod text;
#[cfg(test)]
mod transform;
#[cfg(test)]
mod writable;
