macro_rules! value_subtype_impls {
    ($t:ty, $cf:ident, $rcf:ident) => {
        impl std::convert::AsRef<crate::JValue> for $t {
            fn as_ref(&self) -> &crate::JValue {
                &self.0
            }
        }
        impl std::borrow::Borrow<crate::JValue> for $t {
            fn borrow(&self) -> &crate::JValue {
                &self.0
            }
        }
        impl std::convert::From<$t> for crate::JValue {
            fn from(other: $t) -> Self {
                other.0
            }
        }
        impl std::convert::TryFrom<crate::JValue> for $t {
            type Error = crate::JValue;
            fn try_from(other: crate::JValue) -> Result<Self, crate::JValue> {
                other.$cf()
            }
        }
        impl<'a> std::convert::TryFrom<&'a crate::JValue> for &'a $t {
            type Error = ();
            fn try_from(other: &'a crate::JValue) -> Result<Self, ()> {
                other.$rcf().ok_or(())
            }
        }
    };
}

macro_rules! typed_conversions {
    ($(
        $interm:ty: $(
            $src:ty
            $(where ($($gb:tt)*))*
        ),*;
    )*) => {
        $(
            $(
                impl $(<$($gb)*>)* From<$src> for JValue {
                    fn from(other: $src) -> Self {
                        <$interm>::from(other).into()
                    }
                }
            )*
        )*
    }
}

/// Builds a [`JValue`](crate::JValue) from a JSON literal.
///
/// ```
/// # use vjson::vjson;
/// let value = vjson!({
///     "enabled": true,
///     "thresholds": [1, 2.5, null],
/// });
/// assert!(value.get("enabled").is_true());
/// ```
#[macro_export(local_inner_macros)]
macro_rules! vjson {
    // Hide implementation details from the generated rustdoc.
    ($($json:tt)+) => {
        $crate::vjson_internal!($($json)+)
    };
}

#[macro_export(local_inner_macros)]
#[doc(hidden)]
macro_rules! vjson_internal {
    // Done without trailing comma.
    (@array $array:ident) => {};

    // Done with trailing comma.
    (@array $array:ident ,) => {};

    // Next element is `null`.
    (@array $array:ident , null $($rest:tt)*) => {
        $array.push(vjson_internal!(null)).unwrap();
        vjson_internal!(@array $array $($rest)*)
    };

    // Next element is `true`.
    (@array $array:ident , true $($rest:tt)*) => {
        $array.push(vjson_internal!(true)).unwrap();
        vjson_internal!(@array $array $($rest)*)
    };

    // Next element is `false`.
    (@array $array:ident , false $($rest:tt)*) => {
        $array.push(vjson_internal!(false)).unwrap();
        vjson_internal!(@array $array $($rest)*)
    };

    // Next element is an array.
    (@array $array:ident , [$($arr:tt)*] $($rest:tt)*) => {
        $array.push(vjson_internal!([$($arr)*])).unwrap();
        vjson_internal!(@array $array $($rest)*)
    };

    // Next element is an object.
    (@array $array:ident , {$($obj:tt)*} $($rest:tt)*) => {
        $array.push(vjson_internal!({$($obj)*})).unwrap();
        vjson_internal!(@array $array $($rest)*)
    };

    // Next element is an expression followed by comma.
    (@array $array:ident , $next:expr , $($rest:tt)*) => {
        $array.push(vjson_internal!($next)).unwrap();
        vjson_internal!(@array $array , $($rest)*)
    };

    // Last element is an expression with no trailing comma.
    (@array $array:ident , $last:expr) => {
        $array.push(vjson_internal!($last)).unwrap();
    };

    // Unexpected token after most recent element.
    (@array $array:ident , $unexpected:tt $($rest:tt)*) => {
        vjson_unexpected!($unexpected)
    };

    // Unexpected token after most recent element.
    (@array $array:ident $unexpected:tt $($rest:tt)*) => {
        vjson_unexpected!($unexpected)
    };

    // Done.
    (@object $object:ident () () ()) => {};

    // Insert the current entry followed by trailing comma.
    (@object $object:ident [$($key:tt)+] ($value:expr) , $($rest:tt)*) => {
        let _ = $object.insert(($($key)+), $value).unwrap();
        vjson_internal!(@object $object () ($($rest)*) ($($rest)*));
    };

    // Current entry followed by unexpected token.
    (@object $object:ident [$($key:tt)+] ($value:expr) $unexpected:tt $($rest:tt)*) => {
        vjson_unexpected!($unexpected);
    };

    // Insert the last entry without trailing comma.
    (@object $object:ident [$($key:tt)+] ($value:expr)) => {
        let _ = $object.insert(($($key)+), $value).unwrap();
    };

    // Next value is `null`.
    (@object $object:ident ($($key:tt)+) (: null $($rest:tt)*) $copy:tt) => {
        vjson_internal!(@object $object [$($key)+] (vjson_internal!(null)) $($rest)*);
    };

    // Next value is `true`.
    (@object $object:ident ($($key:tt)+) (: true $($rest:tt)*) $copy:tt) => {
        vjson_internal!(@object $object [$($key)+] (vjson_internal!(true)) $($rest)*);
    };

    // Next value is `false`.
    (@object $object:ident ($($key:tt)+) (: false $($rest:tt)*) $copy:tt) => {
        vjson_internal!(@object $object [$($key)+] (vjson_internal!(false)) $($rest)*);
    };

    // Next value is an array.
    (@object $object:ident ($($key:tt)+) (: [$($array:tt)*] $($rest:tt)*) $copy:tt) => {
        vjson_internal!(@object $object [$($key)+] (vjson_internal!([$($array)*])) $($rest)*);
    };

    // Next value is a map.
    (@object $object:ident ($($key:tt)+) (: {$($map:tt)*} $($rest:tt)*) $copy:tt) => {
        vjson_internal!(@object $object [$($key)+] (vjson_internal!({$($map)*})) $($rest)*);
    };

    // Next value is an expression followed by comma.
    (@object $object:ident ($($key:tt)+) (: $value:expr , $($rest:tt)*) $copy:tt) => {
        vjson_internal!(@object $object [$($key)+] (vjson_internal!($value)) , $($rest)*);
    };

    // Last value is an expression with no trailing comma.
    (@object $object:ident ($($key:tt)+) (: $value:expr) $copy:tt) => {
        vjson_internal!(@object $object [$($key)+] (vjson_internal!($value)));
    };

    // Missing value for last entry. Trigger a reasonable error message.
    (@object $object:ident ($($key:tt)+) (:) $copy:tt) => {
        // "unexpected end of macro invocation"
        vjson_internal!();
    };

    // Missing colon and value for last entry. Trigger a reasonable error
    // message.
    (@object $object:ident ($($key:tt)+) () $copy:tt) => {
        // "unexpected end of macro invocation"
        vjson_internal!();
    };

    // Misplaced colon. Trigger a reasonable error message.
    (@object $object:ident () (: $($rest:tt)*) ($colon:tt $($copy:tt)*)) => {
        // Takes no arguments so "no rules expected the token `:`".
        vjson_unexpected!($colon);
    };

    // Found a comma inside a key. Trigger a reasonable error message.
    (@object $object:ident ($($key:tt)*) (, $($rest:tt)*) ($comma:tt $($copy:tt)*)) => {
        // Takes no arguments so "no rules expected the token `,`".
        vjson_unexpected!($comma);
    };

    // Key is fully parenthesized. This avoids clippy double_parens false
    // positives because the parenthesization may be necessary here.
    (@object $object:ident () (($key:expr) : $($rest:tt)*) $copy:tt) => {
        vjson_internal!(@object $object ($key) (: $($rest)*) (: $($rest)*));
    };

    // Refuse to absorb colon token into key expression.
    (@object $object:ident ($($key:tt)*) (: $($unexpected:tt)+) $copy:tt) => {
        vjson_expect_expr_comma!($($unexpected)+);
    };

    // Munch a token into the current key.
    (@object $object:ident ($($key:tt)*) ($tt:tt $($rest:tt)*) $copy:tt) => {
        vjson_internal!(@object $object ($($key)* $tt) ($($rest)*) ($($rest)*));
    };

    //////////////////////////////////////////////////////////////////////////
    // The main implementation.
    //
    // Must be invoked as: vjson_internal!($($json)+)
    //////////////////////////////////////////////////////////////////////////

    (null) => {
        $crate::JValue::NULL
    };

    (true) => {
        $crate::JValue::TRUE
    };

    (false) => {
        $crate::JValue::FALSE
    };

    ([]) => {
        $crate::JValue::from($crate::JArray::new())
    };

    ([ $($tt:tt)+ ]) => {
        $crate::JValue::from({
            let mut array = $crate::JArray::new();
            vjson_internal!(@array array , $($tt)+);
            array
        })
    };

    ({}) => {
        $crate::JValue::from($crate::JObject::new())
    };

    ({ $($tt:tt)+ }) => {
        $crate::JValue::from({
            let mut object = $crate::JObject::new();
            vjson_internal!(@object object () ($($tt)+) ($($tt)+));
            object
        })
    };

    // Any Serialize type: numbers, strings, struct literals, variables etc.
    // Must be below every other rule.
    ($other:expr) => {
        $crate::to_value(&$other).unwrap()
    };
}

#[macro_export]
#[doc(hidden)]
macro_rules! vjson_unexpected {
    () => {};
}

#[macro_export]
#[doc(hidden)]
macro_rules! vjson_expect_expr_comma {
    ($e:expr , $($tt:tt)*) => {};
}
